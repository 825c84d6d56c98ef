//! Per-CPU block reached through GS.
//!
//! Only the boot CPU is scheduled, but the `swapgs` dance is still needed:
//! the `SYSCALL` entry stub switches to the kernel stack by reading
//! `GS:[8]` before any Rust code runs. Field offsets are part of the
//! contract with that assembly.

use core::cell::UnsafeCell;

use super::msr;

/// The per-CPU block. Offsets are referenced from assembly:
/// `GS:[0]` self pointer, `GS:[8]` kernel RSP, `GS:[16]` saved user RSP.
#[repr(C)]
pub struct PerCpu {
    /// Self pointer, so `GS:[0]` yields the block's address.
    pub self_ptr: u64,
    /// Kernel stack pointer loaded on `SYSCALL` entry.
    pub kernel_rsp: u64,
    /// User stack pointer saved on `SYSCALL` entry.
    pub user_rsp: u64,
}

/// Wrapper making the static writable from assembly and `set_kernel_rsp`.
#[repr(transparent)]
struct SyncPerCpu(UnsafeCell<PerCpu>);

// SAFETY: Mutated only with interrupts disabled on a single CPU: from
// `set_kernel_rsp` during context switches and from the syscall entry stub.
unsafe impl Sync for SyncPerCpu {}

static BSP_PERCPU: SyncPerCpu = SyncPerCpu(UnsafeCell::new(PerCpu {
    self_ptr: 0,
    kernel_rsp: 0,
    user_rsp: 0,
}));

/// Installs the per-CPU block: `GS_BASE` and `KERNEL_GS_BASE` both point at
/// it so the first `swapgs` pairing works out.
///
/// # Safety
///
/// Must run once during early boot, before interrupts or syscalls.
pub unsafe fn init(kernel_rsp: u64) {
    let block = BSP_PERCPU.0.get();
    // SAFETY: Single-threaded early boot.
    unsafe {
        (*block).self_ptr = block as u64;
        (*block).kernel_rsp = kernel_rsp;
        msr::wrmsr(msr::IA32_GS_BASE, block as u64);
        msr::wrmsr(msr::IA32_KERNEL_GS_BASE, block as u64);
    }
}

/// Updates the kernel stack used by the next `SYSCALL` entry.
///
/// # Safety
///
/// `rsp` must be the top of a mapped kernel stack; interrupts must be
/// disabled (context-switch path).
pub unsafe fn set_kernel_rsp(rsp: u64) {
    // SAFETY: See type-level comment.
    unsafe {
        (*BSP_PERCPU.0.get()).kernel_rsp = rsp;
    }
}

/// The user RSP saved by the most recent `SYSCALL` entry.
#[must_use]
pub fn saved_user_rsp() -> u64 {
    // SAFETY: Plain read; the field is only written with interrupts off.
    unsafe { (*BSP_PERCPU.0.get()).user_rsp }
}
