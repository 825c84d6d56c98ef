//! Hardware interrupt dispatch.
//!
//! A 24-entry handler table covers the I/O APIC's redirection inputs; IRQ
//! `n` arrives at vector `32 + n`. Registration is late-binding (drivers
//! bind after APIC bring-up); an IRQ with no handler is dispatched as a
//! no-op. EOI is sent unconditionally at the dispatcher tail.
//!
//! Vector 32 (the LAPIC timer) bypasses the table with a dedicated handler
//! that sends EOI *before* offering the scheduler a chance to switch away,
//! so the next context cannot stall the interrupt controller.

use core::sync::atomic::{AtomicPtr, Ordering};

use super::super::idt::{self, InterruptStackFrame};
use super::super::lapic;
use super::{IRQ_VECTOR_BASE, SPURIOUS_VECTOR};

/// Number of routable IRQ lines (I/O APIC inputs 0..23).
pub const NUM_IRQS: usize = 24;

/// An IRQ handler, receiving its IRQ number.
pub type IrqHandler = fn(u8);

/// The handler table. Null = unhandled (dispatched as a no-op).
static HANDLERS: [AtomicPtr<()>; NUM_IRQS] = {
    const EMPTY: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
    [EMPTY; NUM_IRQS]
};

/// Registration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// IRQ number out of range.
    InvalidIrq,
    /// A handler is already bound to this line.
    AlreadyRegistered,
}

/// Binds `handler` to `irq` (0..23).
///
/// # Errors
///
/// [`IrqError`] on a bad line or double registration.
pub fn register_irq_handler(irq: u8, handler: IrqHandler) -> Result<(), IrqError> {
    let slot = HANDLERS.get(irq as usize).ok_or(IrqError::InvalidIrq)?;
    slot.compare_exchange(
        core::ptr::null_mut(),
        handler as *mut (),
        Ordering::AcqRel,
        Ordering::Acquire,
    )
    .map(|_| ())
    .map_err(|_| IrqError::AlreadyRegistered)
}

/// Common dispatch: invoke the bound handler (if any), then EOI.
fn dispatch_irq(irq: u8) {
    if let Some(slot) = HANDLERS.get(irq as usize) {
        let handler = slot.load(Ordering::Acquire);
        if !handler.is_null() {
            // SAFETY: Only `register_irq_handler` stores into the table,
            // and it stores valid `fn(u8)` pointers.
            let handler: IrqHandler = unsafe { core::mem::transmute(handler) };
            handler(irq);
        }
    }
    lapic::eoi();
}

macro_rules! irq_stub {
    ($name:ident, $irq:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
            dispatch_irq($irq);
        }
    };
}

irq_stub!(irq_1, 1);
irq_stub!(irq_2, 2);
irq_stub!(irq_3, 3);
irq_stub!(irq_4, 4);
irq_stub!(irq_5, 5);
irq_stub!(irq_6, 6);
irq_stub!(irq_7, 7);
irq_stub!(irq_8, 8);
irq_stub!(irq_9, 9);
irq_stub!(irq_10, 10);
irq_stub!(irq_11, 11);
irq_stub!(irq_12, 12);
irq_stub!(irq_13, 13);
irq_stub!(irq_14, 14);
irq_stub!(irq_15, 15);
irq_stub!(irq_16, 16);
irq_stub!(irq_17, 17);
irq_stub!(irq_18, 18);
irq_stub!(irq_19, 19);
irq_stub!(irq_20, 20);
irq_stub!(irq_21, 21);
irq_stub!(irq_22, 22);
irq_stub!(irq_23, 23);

/// The timer tick: vector 32, IRQ 0's slot, special-cased so preemption
/// happens after EOI and only for interrupts that arrived from ring 3.
extern "x86-interrupt" fn timer_interrupt(frame: InterruptStackFrame) {
    crate::time::on_tick();
    lapic::eoi();
    if frame.from_user() {
        crate::proc::sched::tick_preempt();
    }
}

/// Spurious interrupts need no EOI and no work.
extern "x86-interrupt" fn spurious_interrupt(_frame: InterruptStackFrame) {}

/// Installs the timer vector, the 23 generic IRQ stubs, and the spurious
/// vector.
pub(in crate::arch) fn install_irq_stubs() {
    idt::set_handler(IRQ_VECTOR_BASE, timer_interrupt);

    let stubs: [idt::Handler; NUM_IRQS - 1] = [
        irq_1, irq_2, irq_3, irq_4, irq_5, irq_6, irq_7, irq_8, irq_9, irq_10, irq_11, irq_12,
        irq_13, irq_14, irq_15, irq_16, irq_17, irq_18, irq_19, irq_20, irq_21, irq_22, irq_23,
    ];
    for (i, stub) in stubs.iter().enumerate() {
        idt::set_handler(IRQ_VECTOR_BASE + 1 + i as u8, *stub);
    }

    idt::set_handler(SPURIOUS_VECTOR, spurious_interrupt);
}
