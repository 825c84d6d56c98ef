//! Kernel virtual memory manager.
//!
//! Builds the kernel's own page tables during boot — the kernel image at
//! its link address and all of physical memory behind the HHDM — then
//! switches CR3 away from the bootloader's tables. MMIO and
//! write-combining remaps mutate these live tables and flush the TLB.

use core::sync::atomic::{AtomicU64, Ordering};

use zenith_core::{PAGE_SIZE, PhysAddr, VirtAddr};

use super::paging::{self, PageWalker};
use super::{hhdm, pfa};
use crate::boot::MemoryRegion;

unsafe extern "C" {
    /// Kernel image start, defined by the linker script.
    static KERNEL_IMAGE_START: u8;
    /// Kernel image end, defined by the linker script.
    static KERNEL_IMAGE_END: u8;
}

/// Physical address of the kernel PML4; 0 before [`init`].
static KERNEL_PML4: AtomicU64 = AtomicU64::new(0);

/// The kernel PML4 root.
///
/// # Panics
///
/// Panics before [`init`].
#[must_use]
pub fn kernel_pml4() -> PhysAddr {
    let pml4 = KERNEL_PML4.load(Ordering::Acquire);
    assert!(pml4 != 0, "VMM not initialized");
    PhysAddr::new(pml4)
}

fn with_walker<R>(f: impl FnOnce(&PageWalker, &mut dyn FnMut() -> PhysAddr) -> R) -> R {
    let walker = PageWalker::new(hhdm::offset());
    pfa::with_pfa(|pool| {
        let mut alloc = || {
            pool.allocate()
                .expect("page pool exhausted while building kernel page tables")
        };
        f(&walker, &mut alloc)
    })
}

/// Builds and activates the kernel address space.
///
/// Maps the kernel image (link address → its physical load address) and
/// every firmware memory region at its HHDM alias, then loads CR3.
///
/// # Safety
///
/// Must run once during boot, before any reference to HHDM memory that the
/// bootloader tables did not also map.
pub unsafe fn init(
    kernel_phys_base: PhysAddr,
    kernel_virt_base: VirtAddr,
    memory_map: &[MemoryRegion],
) {
    let hhdm_offset = hhdm::offset();

    let pml4 = with_walker(|walker, alloc| {
        let pml4 = alloc();
        // SAFETY: Fresh frame; zeroing gives an empty root table.
        unsafe {
            core::ptr::write_bytes((hhdm_offset + pml4.as_u64()) as *mut u8, 0, PAGE_SIZE);
        }

        // Kernel image pages at their link addresses.
        // SAFETY: The linker symbols bound the loaded image.
        let (image_start, image_end) = unsafe {
            (
                VirtAddr::new(&KERNEL_IMAGE_START as *const u8 as u64).align_down(PAGE_SIZE as u64),
                VirtAddr::new(&KERNEL_IMAGE_END as *const u8 as u64).align_up(PAGE_SIZE as u64),
            )
        };
        let mut virt = image_start;
        while virt < image_end {
            let phys = kernel_phys_base + (virt.as_u64() - kernel_virt_base.as_u64());
            // SAFETY: One-to-one image mapping into a fresh tree.
            unsafe { walker.map(pml4, virt, phys, paging::kernel_flags(), alloc) };
            virt = virt + PAGE_SIZE as u64;
        }

        // The HHDM: every firmware-reported region, whatever its kind —
        // the kernel reads module data, ACPI tables, and MMIO through it.
        for region in memory_map {
            let mut offset = 0;
            while offset < region.size {
                let phys = region.start + offset;
                // SAFETY: Building the direct map in a fresh tree.
                unsafe {
                    walker.map(
                        pml4,
                        VirtAddr::new_truncate(hhdm_offset + phys.as_u64()),
                        phys,
                        paging::kernel_flags(),
                        alloc,
                    );
                }
                offset += PAGE_SIZE as u64;
            }
        }

        pml4
    });

    KERNEL_PML4.store(pml4.as_u64(), Ordering::Release);
    // SAFETY: The new tree maps the executing kernel image and the HHDM.
    unsafe { paging::load_cr3(pml4) };
    crate::kinfo!("vmm: kernel page tables active (pml4 at {pml4})");
}

/// Remaps `size` bytes at `phys` through the HHDM with the MMIO profile
/// (cache-disable + write-through) and returns the virtual base.
pub fn map_mmio_region(phys: PhysAddr, size: u64) -> VirtAddr {
    remap_region(phys, size, paging::mmio_flags())
}

/// Remaps `size` bytes at `phys` through the HHDM write-combined (the
/// framebuffer profile) and returns the virtual base.
pub fn map_wc_region(phys: PhysAddr, size: u64) -> VirtAddr {
    remap_region(phys, size, paging::wc_flags())
}

fn remap_region(phys: PhysAddr, size: u64, flags: paging::PageTableFlags) -> VirtAddr {
    let pml4 = kernel_pml4();
    let base = phys.align_down(PAGE_SIZE as u64);
    let end = (phys + size).align_up(PAGE_SIZE as u64);

    with_walker(|walker, alloc| {
        let mut page = base;
        while page < end {
            // SAFETY: Remapping an HHDM alias in the live kernel tree; the
            // TLB flush below publishes the attribute change.
            unsafe {
                walker.map(pml4, hhdm::phys_to_virt(page), page, flags, alloc);
            }
            page = page + PAGE_SIZE as u64;
        }
    });

    paging::flush_tlb();
    hhdm::phys_to_virt(phys)
}

/// EFI memory descriptor types whose regions firmware code dereferences at
/// runtime.
const EFI_RUNTIME_SERVICES_CODE: u32 = 5;
const EFI_RUNTIME_SERVICES_DATA: u32 = 6;

/// Identity-maps the EFI runtime service regions so `ResetSystem` can
/// reach its own code and data at the physical addresses it was handed.
///
/// # Safety
///
/// `descriptors` must point at the EFI memory map (HHDM-reachable) with
/// `descriptor_size`-byte strides.
pub unsafe fn map_efi_runtime(descriptors: *const u8, map_size: usize, descriptor_size: usize) {
    if descriptor_size < 24 {
        return;
    }
    let pml4 = kernel_pml4();
    let count = map_size / descriptor_size;

    with_walker(|walker, alloc| {
        for i in 0..count {
            // SAFETY: Caller vouches for the descriptor array.
            let descriptor = unsafe { descriptors.add(i * descriptor_size) };
            // EFI_MEMORY_DESCRIPTOR: Type u32, pad, PhysicalStart u64,
            // VirtualStart u64, NumberOfPages u64, Attribute u64.
            let (kind, phys_start, pages) = unsafe {
                (
                    core::ptr::read_unaligned(descriptor as *const u32),
                    core::ptr::read_unaligned(descriptor.add(8) as *const u64),
                    core::ptr::read_unaligned(descriptor.add(24) as *const u64),
                )
            };
            if kind != EFI_RUNTIME_SERVICES_CODE && kind != EFI_RUNTIME_SERVICES_DATA {
                continue;
            }
            for page in 0..pages {
                let phys = PhysAddr::new(phys_start + page * PAGE_SIZE as u64);
                // SAFETY: Identity mapping of firmware-owned memory.
                unsafe {
                    walker.map(
                        pml4,
                        VirtAddr::new_truncate(phys.as_u64()),
                        phys,
                        paging::kernel_flags(),
                        alloc,
                    );
                }
            }
        }
    });
    paging::flush_tlb();
}
