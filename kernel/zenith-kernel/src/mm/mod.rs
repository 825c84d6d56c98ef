//! Memory management: physical page pool, kernel heap, and paging.
//!
//! Bring-up order is strict: the page-frame allocator is seeded from the
//! largest usable firmware region, the heap grows out of the page pool, and
//! the virtual memory manager builds the kernel page tables on top of both.

pub mod heap;
pub mod hhdm;
pub mod layout;
pub mod paging;
pub mod pfa;

#[cfg(target_os = "none")]
pub mod vmm;

pub use zenith_core::PAGE_SIZE;
