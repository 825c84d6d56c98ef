//! Higher-Half Direct Map offset.
//!
//! The bootloader maps all physical memory linearly at a fixed virtual
//! offset. Storing that offset once lets every subsystem translate physical
//! addresses without threading it through each call.

use core::sync::atomic::{AtomicU64, Ordering};

use zenith_core::{PhysAddr, VirtAddr};

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Stores the HHDM offset reported by the bootloader.
///
/// Must be called once, before any physical memory is touched through the
/// direct map.
pub fn init(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

/// Returns the HHDM offset.
#[must_use]
pub fn offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// Translates a physical address to its direct-map virtual alias.
#[must_use]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new_truncate(offset() + phys.as_u64())
}

/// Translates a direct-map virtual address back to its physical address.
#[must_use]
pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new(virt.as_u64() - offset())
}
