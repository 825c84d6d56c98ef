//! IDT construction and loading.
//!
//! 256 gates, all through the kernel code selector at DPL 0 (the CPU
//! delivers exceptions and hardware interrupts regardless of DPL; only
//! software `int` needs more, and userspace gets `SYSCALL` instead).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use super::gdt::KERNEL_CS;

/// The stack frame the CPU pushes on interrupt delivery.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    /// Saved instruction pointer.
    pub rip: u64,
    /// Saved code segment.
    pub cs: u64,
    /// Saved RFLAGS.
    pub rflags: u64,
    /// Saved stack pointer.
    pub rsp: u64,
    /// Saved stack segment.
    pub ss: u64,
}

impl InterruptStackFrame {
    /// `true` when the interrupt arrived from ring 3.
    #[must_use]
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// One 16-byte interrupt gate.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct Gate {
    offset_low: u16,
    selector: u16,
    options: u16,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl Gate {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            options: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set(&mut self, handler_addr: u64) {
        self.offset_low = handler_addr as u16;
        self.offset_mid = (handler_addr >> 16) as u16;
        self.offset_high = (handler_addr >> 32) as u32;
        self.selector = KERNEL_CS;
        // Present, DPL 0, 64-bit interrupt gate (type 0xE), no IST.
        self.options = 0x8E00;
    }
}

/// Handler signatures accepted by the IDT.
pub type Handler = extern "x86-interrupt" fn(InterruptStackFrame);
/// Handler that receives a hardware error code.
pub type HandlerWithCode = extern "x86-interrupt" fn(InterruptStackFrame, u64);
/// Diverging handler with an error code (double fault).
pub type DivergingHandlerWithCode = extern "x86-interrupt" fn(InterruptStackFrame, u64) -> !;

struct SyncIdt(UnsafeCell<[Gate; 256]>);

// SAFETY: The table is fully built before `load` and never mutated after.
unsafe impl Sync for SyncIdt {}

static IDT: SyncIdt = SyncIdt(UnsafeCell::new([Gate::missing(); 256]));
static IDT_LOADED: AtomicBool = AtomicBool::new(false);

fn idt_mut() -> &'static mut [Gate; 256] {
    assert!(!IDT_LOADED.load(Ordering::Acquire), "IDT mutated after load");
    // SAFETY: Guarded by the loaded flag; building runs single-threaded.
    unsafe { &mut *IDT.0.get() }
}

/// Installs a plain handler.
pub fn set_handler(vector: u8, handler: Handler) {
    idt_mut()[vector as usize].set(handler as usize as u64);
}

/// Installs a handler that receives an error code.
pub fn set_handler_with_code(vector: u8, handler: HandlerWithCode) {
    idt_mut()[vector as usize].set(handler as usize as u64);
}

/// Installs a diverging handler (double fault).
pub fn set_diverging_handler(vector: u8, handler: DivergingHandlerWithCode) {
    idt_mut()[vector as usize].set(handler as usize as u64);
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Wires every gate and loads the IDT.
///
/// # Safety
///
/// Must run after the GDT is loaded (gates reference `KERNEL_CS`).
pub unsafe fn init() {
    super::interrupts::install_all();
    IDT_LOADED.store(true, Ordering::Release);

    let pointer = DescriptorTablePointer {
        limit: (core::mem::size_of::<[Gate; 256]>() - 1) as u16,
        base: IDT.0.get() as u64,
    };
    // SAFETY: The IDT is 'static and fully populated.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(nostack, preserves_flags));
    }
    crate::kdebug!("idt: 256 gates loaded");
}
