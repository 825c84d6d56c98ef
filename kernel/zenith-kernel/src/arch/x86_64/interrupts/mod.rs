//! Interrupt wiring: exception gates, the IRQ dispatch table, and the
//! interrupt-flag helpers.

pub mod dispatch;
pub mod handlers;

/// Vector of the first ISA IRQ; IRQ n arrives at vector `32 + n`.
pub const IRQ_VECTOR_BASE: u8 = 32;

/// The spurious-interrupt vector programmed into the LAPIC SVR.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Wires all 256 gates: exceptions, IRQ stubs, the preemption-aware timer
/// vector, and the spurious handler.
pub(super) fn install_all() {
    handlers::install_exception_gates();
    dispatch::install_irq_stubs();
}

/// Saves RFLAGS and disables interrupts, returning the old flags.
#[must_use]
pub fn save_and_disable() -> u64 {
    let flags: u64;
    // SAFETY: pushfq/cli only read and mask the interrupt flag.
    unsafe {
        core::arch::asm!("pushfq", "pop {}", "cli", out(reg) flags, options(nomem));
    }
    flags
}

/// Restores a flags value saved by [`save_and_disable`]; re-enables
/// interrupts iff they were enabled before.
pub fn restore(flags: u64) {
    if flags & 0x200 != 0 {
        // SAFETY: Re-enabling interrupts; all handlers are installed.
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) };
    }
}

/// Enables interrupts.
///
/// # Safety
///
/// The IDT and interrupt controllers must be fully initialized.
pub unsafe fn enable() {
    // SAFETY: Forwarded caller contract.
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) };
}

/// Enables interrupts and halts until the next one; the `sti; hlt` pair is
/// atomic with respect to interrupt delivery.
pub fn enable_and_halt() {
    // SAFETY: Idle-loop idiom; an interrupt wakes the CPU and its handler
    // runs before the instruction after hlt.
    unsafe { core::arch::asm!("sti", "hlt", "cli", options(nomem, nostack)) };
}
