//! Bootloader-agnostic boot information and the kernel entry point.
//!
//! A Limine-class boot stub (out of tree) converts its native structures
//! into [`BootInfoData`] and calls [`kernel_init`]. The bring-up order is
//! strict — each stage depends on the previous one:
//!
//! firmware hand-off → PFA → heap → GDT/IDT → paging → PAT → framebuffer
//! WC remap → ACPI/APIC/timer → UEFI runtime capture → ramdisk → VFS →
//! SYSCALL MSRs → scheduler → init spawn → preemption on → idle.

use alloc::boxed::Box;

use zenith_core::{PAGE_SIZE, PhysAddr, VirtAddr};

use crate::mm::pfa::FreeRegion;

/// Maximum memory map entries carried in [`BootInfoData`].
pub const MAX_MEMORY_REGIONS: usize = 256;

/// Path of the init binary on the ramdisk drive.
const INIT_PATH: &str = "0:/os/init.elf";

/// Kind of a physical memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Normal usable RAM.
    Usable,
    /// Reserved by firmware or hardware.
    Reserved,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// Bootloader memory, reclaimable after boot.
    BootloaderReclaimable,
    /// Kernel image and modules.
    KernelAndModules,
    /// Memory-mapped framebuffer.
    Framebuffer,
}

/// A contiguous physical memory region.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Physical start address.
    pub start: PhysAddr,
    /// Size in bytes.
    pub size: u64,
    /// Region kind.
    pub kind: MemoryRegionKind,
}

/// Linear framebuffer description (32 bpp).
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    /// Physical base of the pixel buffer.
    pub phys_base: PhysAddr,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per scanline (may exceed `width * 4`).
    pub pitch: u32,
    /// Bits per pixel.
    pub bpp: u32,
}

/// Kernel image load addresses.
#[derive(Debug, Clone, Copy)]
pub struct KernelAddress {
    /// Physical load base.
    pub phys_base: PhysAddr,
    /// Virtual link base.
    pub virt_base: VirtAddr,
}

/// EFI tables handed over by the bootloader.
#[derive(Debug, Clone, Copy)]
pub struct EfiInfo {
    /// Physical address of the EFI system table.
    pub system_table: PhysAddr,
    /// Physical address of the EFI memory map.
    pub memory_map: PhysAddr,
    /// Memory map size in bytes.
    pub memory_map_size: usize,
    /// Stride of one descriptor.
    pub descriptor_size: usize,
}

/// A module loaded by the bootloader (the USTAR ramdisk).
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo {
    /// Physical address of the module data.
    pub phys: PhysAddr,
    /// Size in bytes.
    pub size: u64,
}

/// Boot information contract implemented by the boot stub.
pub trait BootInfo {
    /// Physical memory map, sorted by start address.
    fn memory_map(&self) -> &[MemoryRegion];

    /// HHDM offset: `virtual = physical + hhdm_offset()`.
    fn hhdm_offset(&self) -> u64;

    /// Kernel load addresses.
    fn kernel_address(&self) -> KernelAddress;

    /// The boot framebuffer, if any.
    fn framebuffer(&self) -> Option<FramebufferInfo>;

    /// ACPI RSDP physical address, if reported.
    fn rsdp_address(&self) -> Option<PhysAddr>;

    /// EFI system table and memory map, if booted via UEFI.
    fn efi(&self) -> Option<EfiInfo>;

    /// The ramdisk module, if loaded.
    fn ramdisk(&self) -> Option<ModuleInfo>;
}

/// Concrete boot info container filled by the boot stub.
pub struct BootInfoData {
    /// Physical memory map.
    pub memory_map: heapless::Vec<MemoryRegion, MAX_MEMORY_REGIONS>,
    /// HHDM offset.
    pub hhdm_offset: u64,
    /// Kernel load addresses.
    pub kernel_address: KernelAddress,
    /// Boot framebuffer.
    pub framebuffer: Option<FramebufferInfo>,
    /// RSDP physical address.
    pub rsdp_address: Option<PhysAddr>,
    /// EFI hand-off.
    pub efi: Option<EfiInfo>,
    /// Ramdisk module.
    pub ramdisk: Option<ModuleInfo>,
}

impl BootInfo for BootInfoData {
    fn memory_map(&self) -> &[MemoryRegion] {
        &self.memory_map
    }

    fn hhdm_offset(&self) -> u64 {
        self.hhdm_offset
    }

    fn kernel_address(&self) -> KernelAddress {
        self.kernel_address
    }

    fn framebuffer(&self) -> Option<FramebufferInfo> {
        self.framebuffer
    }

    fn rsdp_address(&self) -> Option<PhysAddr> {
        self.rsdp_address
    }

    fn efi(&self) -> Option<EfiInfo> {
        self.efi
    }

    fn ramdisk(&self) -> Option<ModuleInfo> {
        self.ramdisk
    }
}

/// Framebuffer geometry captured for `SYS_FBINFO`/`SYS_FBMAP`.
static FRAMEBUFFER: zenith_core::sync::SpinLock<Option<FramebufferInfo>> =
    zenith_core::sync::SpinLock::new(None);

/// The boot framebuffer, if one was reported.
#[must_use]
pub fn framebuffer() -> Option<FramebufferInfo> {
    *FRAMEBUFFER.lock()
}

/// Dedicated interrupt stack for the boot thread; user processes get their
/// own kernel stacks at spawn.
#[repr(align(16))]
struct BootIrqStack([u8; crate::mm::layout::KERNEL_STACK_SIZE]);

static BOOT_IRQ_STACK: BootIrqStack = BootIrqStack([0; crate::mm::layout::KERNEL_STACK_SIZE]);

/// Kernel entry point; the boot stub calls this exactly once.
///
/// # Panics
///
/// Panics (halting the machine) on any bootstrap failure: missing memory
/// map, page pool exhaustion, unusable ACPI, or a missing init binary.
pub fn kernel_init(boot_info: &impl BootInfo) -> ! {
    crate::arch::cpu_init();

    // Physical memory first: everything else allocates.
    crate::mm::hhdm::init(boot_info.hhdm_offset());
    let largest = crate::mm::pfa::largest_region(
        boot_info
            .memory_map()
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .map(|r| FreeRegion { base: r.start, size: r.size }),
    )
    .expect("firmware memory map reports no usable region");
    // SAFETY: The region comes from the firmware map and the HHDM covers it.
    unsafe { crate::mm::pfa::init(largest, boot_info.hhdm_offset()) };
    crate::mm::heap::init(boot_info.hhdm_offset());

    // Heap is up: bring up logging.
    crate::log::init();
    crate::log::add_sink(Box::new(crate::log::SerialSink::new(crate::log::LogLevel::Debug)));
    crate::log::add_sink(Box::new(crate::terminal::TerminalSink::new(
        crate::log::LogLevel::Info,
    )));
    crate::kinfo!("zenith: early boot, hhdm at {:#x}", boot_info.hhdm_offset());
    crate::mm::pfa::with_pfa(|pool| {
        crate::kinfo!(
            "pfa: {} MiB pool seeded at {}",
            pool.total_bytes() / (1024 * 1024),
            largest.base,
        );
    });

    // Descriptor tables before paging, so faults are reportable.
    let irq_stack_top = BOOT_IRQ_STACK.0.as_ptr() as u64 + crate::mm::layout::KERNEL_STACK_SIZE as u64;
    // SAFETY: Early single-threaded boot; stack is static.
    unsafe {
        crate::arch::x86_64::percpu::init(irq_stack_top);
        crate::arch::x86_64::gdt::init();
        crate::arch::x86_64::gdt::set_tss_rsp0(irq_stack_top);
        crate::arch::x86_64::idt::init();
    }

    // Own page tables, then the PAT so WC mappings mean write-combining.
    let kernel_address = boot_info.kernel_address();
    // SAFETY: Boot order guarantees nothing references unmapped HHDM yet.
    unsafe {
        crate::mm::vmm::init(
            kernel_address.phys_base,
            kernel_address.virt_base,
            boot_info.memory_map(),
        );
        crate::arch::x86_64::pat::init();
    }
    crate::mm::paging::flush_tlb();

    // Framebuffer burst writes from here on.
    if let Some(fb) = boot_info.framebuffer() {
        *FRAMEBUFFER.lock() = Some(fb);
        let bytes = u64::from(fb.pitch) * u64::from(fb.height);
        crate::mm::vmm::map_wc_region(fb.phys_base, bytes);
        crate::kinfo!(
            "fb: {}x{} pitch {} write-combined ({} pages)",
            fb.width,
            fb.height,
            fb.pitch,
            bytes.div_ceil(PAGE_SIZE as u64),
        );
    }

    // Interrupt platform: ACPI → APIC → 1 kHz timer.
    // SAFETY: Paging and the IDT are in place; interrupts still disabled.
    unsafe { crate::arch::platform_init(boot_info.rsdp_address()) };

    // UEFI runtime: wall clock and reset/shutdown services.
    if let Some(efi) = boot_info.efi() {
        // SAFETY: Addresses come from the boot protocol's EFI hand-off.
        unsafe { crate::firmware::capture(efi) };
    }

    // Ramdisk → VFS drive 0.
    if let Some(module) = boot_info.ramdisk() {
        let virt = crate::mm::hhdm::phys_to_virt(module.phys);
        // SAFETY: The module region is covered by the HHDM and marked
        // KernelAndModules, so the slice lives for the kernel's lifetime.
        let data = unsafe { core::slice::from_raw_parts(virt.as_ptr(), module.size as usize) };
        crate::fs::vfs::init();
        let ramdisk = crate::fs::ustar::UstarFs::new(data);
        crate::fs::vfs::with_vfs(|vfs| {
            vfs.register_drive(0, Box::new(ramdisk))
                .expect("drive 0 registration cannot fail on an empty table");
        });
    } else {
        crate::kwarn!("boot: no ramdisk module, VFS left empty");
        crate::fs::vfs::init();
    }

    // The syscall gate.
    // SAFETY: GDT selectors and the per-CPU block are in place.
    unsafe { crate::arch::x86_64::syscall::init() };

    // Scheduler with the boot thread as slot 0, then init as pid 1.
    crate::proc::sched::init(crate::mm::vmm::kernel_pml4());
    crate::log::set_suppressed(true);
    match crate::proc::exec::spawn(INIT_PATH, "", 0, false) {
        Ok(pid) => crate::kinfo!("boot: init spawned as pid {pid}"),
        Err(e) => panic!("failed to spawn {INIT_PATH}: {e}"),
    }

    crate::proc::sched::set_preemption(true);
    // SAFETY: All interrupt infrastructure is initialized.
    unsafe { crate::arch::x86_64::interrupts::enable() };

    crate::proc::sched::idle_loop()
}
