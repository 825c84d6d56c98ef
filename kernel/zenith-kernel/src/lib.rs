//! ZenithOS kernel library.
//!
//! The crate is split the same way it is tested: pure-logic modules compile
//! everywhere (and carry host-run unit tests), while modules that touch CPU
//! state, MSRs, or MMIO only exist for `target_os = "none"` builds. The
//! bootloader stub lives out of tree and enters through
//! [`boot::kernel_init`].

#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(target_arch = "x86_64", target_os = "none"), feature(abi_x86_interrupt))]
#![warn(missing_docs)]

extern crate alloc;

// ── Always-available modules (pure logic, host-testable) ─────────────────

pub mod fs;
pub mod input;
pub mod log;
pub mod mm;
pub mod net;
pub mod panic;
pub mod proc;
pub mod rng;
pub mod syscall;
pub mod terminal;
pub mod time;
pub mod winsrv;

// ── Kernel-runtime modules (require target_os = "none") ──────────────────

#[cfg(target_os = "none")]
pub mod arch;
#[cfg(target_os = "none")]
pub mod boot;
#[cfg(target_os = "none")]
pub mod firmware;

#[cfg(target_os = "none")]
pub use boot::kernel_init;
