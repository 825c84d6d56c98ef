//! Kernel context switch and the first descent into ring 3.
//!
//! A context is just a kernel stack pointer: `switch_context` parks the
//! callee-saved registers and RFLAGS on the old stack, stores RSP, and
//! unparks the same set from the new stack. A freshly spawned process gets
//! a hand-built stack whose parked resume address is
//! [`user_entry_trampoline`], which performs the `iretq` into userspace.

use super::gdt::{USER_CS, USER_DS};

/// Initial RFLAGS inside the trampoline: reserved bit 1 only, interrupts
/// still off until `iretq` installs the user flags.
const TRAMPOLINE_RFLAGS: u64 = 0x2;

/// RFLAGS handed to ring 3: reserved bit plus IF.
const USER_RFLAGS: u64 = 0x202;

/// Switches kernel contexts: parks the current one at `*prev_rsp`, resumes
/// the one whose stack pointer is `next_rsp`.
///
/// # Safety
///
/// - Interrupts must be disabled.
/// - `next_rsp` must have been produced by this function or by
///   [`prepare_initial_stack`].
/// - CR3, TSS.RSP0, and the per-CPU kernel RSP must already describe the
///   next process.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(prev_rsp: *mut u64, next_rsp: u64) {
    core::arch::naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "pushfq",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Builds the parked context for a process that has never run: when
/// switched to, it pops zeroed registers and returns into
/// [`user_entry_trampoline`]. Returns the stack pointer to store in the
/// process context.
///
/// `stack_top` must be 16-byte aligned.
#[must_use]
pub fn prepare_initial_stack(stack_top: u64) -> u64 {
    assert!(stack_top % 16 == 0, "kernel stack top must be 16-byte aligned");

    // Layout, descending from stack_top: one alignment pad, the resume
    // address, rbp, rbx, r12..r15, rflags. The pad keeps the trampoline's
    // stack congruent with a plain function entry.
    let rsp = stack_top - 9 * 8;
    let slots = rsp as *mut u64;
    // SAFETY: The caller owns the stack; the nine slots are in bounds.
    unsafe {
        slots.write(TRAMPOLINE_RFLAGS); // popped by popfq
        for i in 1..=6 {
            slots.add(i).write(0); // r15, r14, r13, r12, rbx, rbp
        }
        slots.add(7).write(user_entry_trampoline as usize as u64); // ret target
        slots.add(8).write(0); // alignment pad
    }
    rsp
}

/// First-entry path: fetches the current process's entry state and drops
/// to ring 3.
extern "C" fn user_entry_trampoline() -> ! {
    let (entry, user_stack, argv_ptr) = crate::proc::sched::with_sched(|sched| {
        let current = sched.current as u32;
        let process = sched.table.get(current).expect("trampoline without a process");
        (process.entry, process.user_stack_top, process.argv_user_ptr)
    });

    // SAFETY: The scheduler switched CR3 to this process's PML4 before
    // resuming us; entry and stack point into its mapped user space.
    unsafe { enter_user(entry, user_stack, argv_ptr) }
}

/// Drops to ring 3 via `iretq` with scrubbed registers; `argv` rides in
/// `rdi` as `_start`'s argument.
///
/// # Safety
///
/// `entry` and `user_stack` must be mapped user-accessible in the active
/// address space; interrupts must be disabled (the `iretq` frame re-enables
/// them).
pub unsafe fn enter_user(entry: u64, user_stack: u64, argv: u64) -> ! {
    // SAFETY: Builds the canonical iretq frame for ring 3; does not return.
    unsafe {
        core::arch::asm!(
            "push {ss}",
            "push {rsp_val}",
            "push {rflags}",
            "push {cs}",
            "push {rip}",
            "mov rdi, {argv}",
            "xor esi, esi",
            "xor edx, edx",
            "xor ecx, ecx",
            "xor r8d, r8d",
            "xor r9d, r9d",
            "xor r10d, r10d",
            "xor r11d, r11d",
            "xor ebx, ebx",
            "xor ebp, ebp",
            "xor r12d, r12d",
            "xor r13d, r13d",
            "xor r14d, r14d",
            "xor r15d, r15d",
            "xor eax, eax",
            "iretq",
            ss = in(reg) u64::from(USER_DS),
            rsp_val = in(reg) user_stack,
            rflags = const USER_RFLAGS,
            cs = in(reg) u64::from(USER_CS),
            rip = in(reg) entry,
            argv = in(reg) argv,
            options(noreturn),
        );
    }
}
