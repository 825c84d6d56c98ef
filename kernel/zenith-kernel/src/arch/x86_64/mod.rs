//! x86_64 support: CPU setup, descriptor tables, interrupt controllers,
//! the syscall gate, and context switching.

pub mod acpi;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod interrupts;
pub mod io_apic;
pub mod lapic;
pub mod msr;
pub mod pat;
pub mod percpu;
pub mod pic;
pub mod pit;
pub mod port;
pub mod syscall;

/// Early CPU feature setup: enables SSE/SSE2, which userspace binaries are
/// compiled to assume.
pub fn cpu_init() {
    // SAFETY: Standard CR0/CR4 FPU+SSE enable sequence during early boot.
    unsafe {
        core::arch::asm!(
            // CR0: clear EM (no x87 emulation), set MP (monitor coprocessor).
            "mov rax, cr0",
            "and rax, ~(1 << 2)",
            "or rax, (1 << 1)",
            "mov cr0, rax",
            // CR4: OSFXSR + OSXMMEXCPT.
            "mov rax, cr4",
            "or rax, (1 << 9) | (1 << 10)",
            "mov cr4, rax",
            out("rax") _,
            options(nostack),
        );
    }
}

/// Interrupt-platform bring-up: ACPI parse, PIC retirement, APIC and timer
/// setup. The descriptor tables are loaded earlier in the boot order.
///
/// # Safety
///
/// Must run once with interrupts disabled, after paging and the IDT.
pub unsafe fn platform_init(rsdp: Option<zenith_core::PhysAddr>) {
    // SAFETY: Forwarded caller contract.
    unsafe { acpi::init(rsdp) };
}

/// Parks the CPU forever with interrupts off.
pub fn halt_forever() -> ! {
    loop {
        // SAFETY: cli+hlt with no wake condition; this is the panic path.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}
