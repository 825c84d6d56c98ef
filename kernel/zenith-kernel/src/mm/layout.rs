//! Virtual address space layout.
//!
//! The lower half belongs to the current user process; the kernel lives in
//! the higher half, which every process PML4 shares (entries 256..511).

/// Base of the per-process user heap; `SYS_ALLOC` bumps upward from here.
pub const USER_HEAP_BASE: u64 = 0x0000_0000_4000_0000;

/// Top of the user stack, just below the 1 TiB user-space ceiling.
pub const USER_STACK_TOP: u64 = 0x0000_00FF_FFFF_F000;

/// User stack size (16 pages).
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Exclusive upper bound of user-space virtual addresses (1 TiB).
pub const USER_SPACE_END: u64 = 0x0000_0100_0000_0000;

/// First PML4 slot of the shared kernel half.
pub const KERNEL_PML4_FIRST: usize = 256;

/// Kernel stack size for each process (16 KiB).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use zenith_core::VirtAddr;

    #[test]
    fn user_space_is_lower_half() {
        assert!(VirtAddr::new(USER_HEAP_BASE).pml4_index() < KERNEL_PML4_FIRST);
        assert!(VirtAddr::new(USER_STACK_TOP).pml4_index() < KERNEL_PML4_FIRST);
        assert!(USER_STACK_TOP < USER_SPACE_END);
    }

    #[test]
    fn kernel_half_starts_at_slot_256() {
        assert_eq!(VirtAddr::new(0xFFFF_8000_0000_0000).pml4_index(), KERNEL_PML4_FIRST);
    }
}
