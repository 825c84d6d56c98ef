//! The scheduler: preemptive round-robin at the timer tick, with
//! cooperative yield for kernel-side waits.
//!
//! Quantum is one tick (1 ms). The timer interrupt preempts only when it
//! arrived from ring 3 — kernel code is never preempted; it yields at
//! defined suspension points instead. Context switches swap per-process
//! kernel stacks; the user-visible state of a preempted process lives in
//! the interrupt frame parked on its kernel stack.

use core::sync::atomic::{AtomicBool, Ordering};

use zenith_core::sync::SpinLock;

use super::{ProcState, Process, ProcessTable};

/// The scheduler's shared state.
pub struct Scheduler {
    /// The process table.
    pub table: ProcessTable,
    /// Slot currently holding the CPU.
    pub current: usize,
}

static SCHED: SpinLock<Option<Scheduler>> = SpinLock::new(None);

/// Gate for timer-driven preemption; flipped on after init is spawned.
static SCHED_ENABLED: AtomicBool = AtomicBool::new(false);

/// Creates the scheduler with the boot thread installed in slot 0.
///
/// The boot thread doubles as the idle task: it parks the CPU in `hlt`
/// whenever every other process is waiting.
pub fn init(boot_pml4: zenith_core::PhysAddr) {
    let mut boot_thread = Process::new(0, 0, "kernel", boot_pml4);
    boot_thread.state = ProcState::Running;

    let mut table = ProcessTable::new();
    let pid = table.insert(boot_thread);
    assert_eq!(pid, Some(0), "boot thread must own slot 0");

    let mut sched = SCHED.lock();
    assert!(sched.is_none(), "scheduler already initialized");
    *sched = Some(Scheduler { table, current: 0 });
}

/// Runs a closure over the scheduler state.
///
/// # Panics
///
/// Panics before [`init`].
pub fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let mut sched = SCHED.lock();
    f(sched.as_mut().expect("scheduler not initialized"))
}

/// Pid of the process currently holding the CPU.
#[must_use]
pub fn current_pid() -> u32 {
    with_sched(|sched| sched.current as u32)
}

/// Enables or disables timer-driven preemption.
///
/// Flipped on only after the init process is spawned, so boot-time banner
/// output is not time-sliced.
pub fn set_preemption(enabled: bool) {
    SCHED_ENABLED.store(enabled, Ordering::Release);
}

/// Whether timer preemption is active.
#[must_use]
pub fn preemption_enabled() -> bool {
    SCHED_ENABLED.load(Ordering::Acquire)
}

// ---------------------------------------------------------------------------
// Context switching (kernel target only)
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod switching {
    use super::{ProcState, SCHED, Scheduler};
    use crate::arch::x86_64::{context, gdt, interrupts, percpu};

    /// Picks the next runnable process and switches to it.
    ///
    /// The suspension point for every kernel-side wait: callers re-check
    /// their condition when the rotation returns to them. Safe to call from
    /// the timer interrupt tail (interrupts are already disabled there).
    pub fn schedule() {
        let flags = interrupts::save_and_disable();

        // Decide under the lock, then switch with the lock released: the
        // next context resumes inside its own earlier schedule() call and
        // must not inherit a held lock.
        let switch: Option<(*mut u64, u64, u64, u64)> = {
            let mut guard = SCHED.lock();
            let sched: &mut Scheduler = guard.as_mut().expect("scheduler not initialized");
            let current = sched.current;

            match sched.table.pick_next(current) {
                Some(next) if next != current => {
                    if let Some(prev) = sched.table.get_mut(current as u32) {
                        if prev.state == ProcState::Running {
                            prev.state = ProcState::Ready;
                        }
                    }
                    let next_proc = sched.table.get_mut(next as u32).expect("picked slot is live");
                    next_proc.state = ProcState::Running;
                    let next_rsp = next_proc.context.rsp;
                    let next_pml4 = next_proc.pml4.as_u64();
                    let next_kstack_top = next_proc.kernel_stack_top;
                    sched.current = next;

                    let prev_proc = sched.table.get_mut(current as u32).expect("current slot is live");
                    let prev_rsp_ptr: *mut u64 = &mut prev_proc.context.rsp;
                    Some((prev_rsp_ptr, next_rsp, next_pml4, next_kstack_top))
                }
                _ => None,
            }
        };

        if let Some((prev_rsp_ptr, next_rsp, next_pml4, next_kstack_top)) = switch {
            // SAFETY: Interrupts are disabled; only this CPU touches the
            // saved contexts, and the pointers refer to table slots that are
            // never moved (the table is a fixed array in a static).
            unsafe {
                if next_kstack_top != 0 {
                    gdt::set_tss_rsp0(next_kstack_top);
                    percpu::set_kernel_rsp(next_kstack_top);
                }
                crate::mm::paging::load_cr3(zenith_core::PhysAddr::new(next_pml4));
                context::switch_context(prev_rsp_ptr, next_rsp);
            }
            // Execution resumes here when this process is switched back in.
        }

        interrupts::restore(flags);
    }

    /// Voluntary yield.
    pub fn yield_now() {
        schedule();
    }

    /// Timer-tick hook: rotate if preemption is enabled.
    ///
    /// The timer handler calls this only for interrupts that arrived from
    /// ring 3 (kernel code is never preempted) and only after it has sent
    /// EOI, so the next context does not stall the interrupt controller.
    pub fn tick_preempt() {
        if super::preemption_enabled() {
            schedule();
        }
    }

    /// Terminates the current process and leaves the CPU for good.
    ///
    /// The slot stays `Terminated` until the parent reclaims it via
    /// `waitpid`.
    pub fn exit_current(code: i32) -> ! {
        super::with_sched(|sched| {
            let current = sched.current as u32;
            if let Some(process) = sched.table.get_mut(current) {
                process.state = ProcState::Terminated;
                process.exit_code = code;
            }
        });
        loop {
            schedule();
        }
    }

    /// The idle loop run by the boot thread once the kernel is up: halt
    /// until an interrupt, then offer the CPU to anyone runnable.
    pub fn idle_loop() -> ! {
        loop {
            schedule();
            interrupts::enable_and_halt();
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use switching::{exit_current, idle_loop, schedule, tick_preempt, yield_now};
