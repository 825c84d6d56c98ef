//! Syscall handler implementations, grouped by subsystem.
//!
//! Handlers run on the calling process's kernel stack with its address
//! space active, so validated user pointers are directly dereferencable.
//! Blocking handlers loop over `sched::yield_now` suspension points.

pub mod fs;
pub mod memory;
pub mod misc;
pub mod net;
pub mod process;
pub mod win;
