//! SYSCALL/SYSRET: MSR setup and the register trampoline.
//!
//! `STAR[47:32] = 0x08` (kernel CS; SS follows at 0x10) and
//! `STAR[63:48] = 0x10`, so `SYSRET` loads SS = 0x18 (user data) and
//! CS = 0x20 (user code) — the reason the GDT places user data *before*
//! user code. `SFMASK` clears IF and DF, so handlers start with interrupts
//! off and the string direction defined.

use super::msr;

/// RFLAGS bits masked on entry: IF (bit 9) and DF (bit 10).
const SFMASK_VALUE: u64 = 0x600;

/// Programs EFER.SCE, STAR, LSTAR, and SFMASK.
///
/// # Safety
///
/// The GDT must already hold the selector layout documented above, and the
/// per-CPU block must be initialized (the entry stub reads `GS:[8]`).
pub unsafe fn init() {
    // SAFETY: Standard SYSCALL MSR programming; values match the GDT.
    unsafe {
        let efer = msr::rdmsr(msr::IA32_EFER);
        msr::wrmsr(msr::IA32_EFER, efer | msr::EFER_SCE);

        msr::wrmsr(msr::IA32_STAR, (0x08u64 << 32) | (0x10u64 << 48));
        msr::wrmsr(msr::IA32_LSTAR, syscall_entry as usize as u64);
        msr::wrmsr(msr::IA32_SFMASK, SFMASK_VALUE);
    }
    crate::kdebug!("syscall: STAR/LSTAR/SFMASK programmed");
}

unsafe extern "C" {
    /// Rust-side dispatcher in `crate::syscall`.
    fn syscall_dispatch(nr: usize, a1: usize, a2: usize, a3: usize, a4: usize, a5: usize) -> isize;
}

/// The `SYSCALL` entry point.
///
/// On entry the CPU has stashed the return RIP in `rcx` and RFLAGS in
/// `r11`, loaded kernel CS/SS, and left RSP alone — the stub switches to
/// the per-CPU kernel stack itself.
///
/// Register convention: number in `rax`; arguments in `rdi`, `rsi`, `rdx`,
/// `r10`, `r8`, `r9` (`r10` stands in for the clobbered `rcx`). The stub
/// remaps them to the SysV C convention for [`syscall_dispatch`].
///
/// Everything except `rax` (return value), `rcx`, and `r11` is restored
/// before `sysretq` — the user-visible clobber set is exactly those three.
/// The saved user RSP is parked on the kernel stack, not only in the
/// per-CPU slot, so a blocking syscall that context-switches (letting
/// another process enter its own syscall and overwrite the slot) still
/// returns to the right stack.
#[unsafe(naked)]
unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "swapgs",
        "mov gs:[16], rsp",         // save caller RSP to percpu.user_rsp
        "mov rsp, gs:[8]",          // switch to percpu.kernel_rsp
        "push qword ptr gs:[16]",   // park user RSP across context switches
        "sub rsp, 8",               // alignment pad
        "push rcx",                 // user RIP
        "push r11",                 // user RFLAGS
        "push rdi",
        "push rsi",
        "push rdx",
        "push r10",
        "push r8",
        "push r9",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Remap to the SysV C convention: rdi=nr, rsi..r9 = a1..a5.
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "mov r9, r8",
        "mov r8, r10",

        "call {dispatch}",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "pop r9",
        "pop r8",
        "pop r10",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop r11",                  // user RFLAGS
        "pop rcx",                  // user RIP
        "add rsp, 8",               // drop the pad
        "mov rsp, [rsp]",           // reload the parked user RSP
        "swapgs",
        "sysretq",
        dispatch = sym syscall_dispatch,
    );
}
