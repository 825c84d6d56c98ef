//! UEFI runtime services glue.
//!
//! The bootloader leaves the EFI system table mapped; at boot the kernel
//! identity-maps the runtime-services regions (so firmware code can follow
//! its own physical pointers), reads `GetTime` once for the wall clock,
//! and keeps the `ResetSystem` pointer for `SYS_RESET`/`SYS_SHUTDOWN` —
//! with a triple fault as the fallback when firmware declines to act.

use core::ffi::c_void;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::boot::EfiInfo;
use crate::mm::hhdm;
use crate::time::DateTime;

/// Offset of the runtime-services pointer inside the EFI system table.
const SYSTEM_TABLE_RUNTIME_SERVICES: usize = 88;

/// Offsets of the service pointers inside the runtime-services table.
const RUNTIME_GET_TIME: usize = 24;
const RUNTIME_RESET_SYSTEM: usize = 104;

/// `EFI_RESET_TYPE` values.
const EFI_RESET_COLD: u32 = 0;
const EFI_RESET_SHUTDOWN: u32 = 2;

/// `EFI_TIME` as firmware fills it.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct EfiTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    _pad1: u8,
    nanosecond: u32,
    timezone: i16,
    daylight: u8,
    _pad2: u8,
}

type GetTimeFn = unsafe extern "efiapi" fn(*mut EfiTime, *mut c_void) -> usize;
type ResetSystemFn = unsafe extern "efiapi" fn(u32, usize, usize, *mut c_void) -> !;

/// Physical address of `ResetSystem`, captured at boot (0 = unavailable).
static RESET_SYSTEM: AtomicU64 = AtomicU64::new(0);

/// Captures the runtime services: maps their regions, reads the wall
/// clock, and stashes the reset entry point.
///
/// # Safety
///
/// `efi` must be the boot protocol's EFI hand-off; must run once, after
/// the VMM is up.
pub unsafe fn capture(efi: EfiInfo) {
    // Identity-map runtime code/data so firmware can run post-boot.
    let map_virt = hhdm::phys_to_virt(efi.memory_map);
    // SAFETY: The EFI memory map is HHDM-reachable firmware memory.
    unsafe {
        crate::mm::vmm::map_efi_runtime(map_virt.as_ptr(), efi.memory_map_size, efi.descriptor_size);
    }

    let system_table = hhdm::phys_to_virt(efi.system_table);
    // SAFETY: The system table layout is fixed by the UEFI specification;
    // the table lives in runtime-services memory we just mapped.
    let runtime_services = unsafe {
        core::ptr::read_unaligned(
            (system_table.as_u64() as usize + SYSTEM_TABLE_RUNTIME_SERVICES) as *const u64,
        )
    };
    if runtime_services == 0 {
        crate::kwarn!("efi: system table has no runtime services");
        return;
    }

    // The runtime-services table is identity-mapped; its function pointers
    // are physical addresses firmware expects to execute from.
    let (get_time, reset_system) = {
        // SAFETY: Fixed table layout, mapped above.
        unsafe {
            (
                core::ptr::read_unaligned((runtime_services as usize + RUNTIME_GET_TIME) as *const u64),
                core::ptr::read_unaligned(
                    (runtime_services as usize + RUNTIME_RESET_SYSTEM) as *const u64,
                ),
            )
        }
    };
    RESET_SYSTEM.store(reset_system, Ordering::Release);

    // One GetTime call seeds the kernel wall clock.
    if get_time != 0 {
        let mut time = EfiTime::default();
        // SAFETY: GetTime only writes its out-parameter; the identity map
        // lets firmware reach its own data.
        let status = unsafe {
            let get_time: GetTimeFn = core::mem::transmute(get_time);
            get_time(&mut time, core::ptr::null_mut())
        };
        if status == 0 {
            crate::time::set_boot_time(DateTime {
                year: time.year,
                month: time.month,
                day: time.day,
                hour: time.hour,
                minute: time.minute,
                second: time.second,
            });
            crate::kinfo!(
                "efi: wall clock {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                time.year,
                time.month,
                time.day,
                time.hour,
                time.minute,
                time.second,
            );
        } else {
            crate::kwarn!("efi: GetTime failed with status {status:#x}");
        }
    }
}

fn reset_via_firmware(reset_type: u32) {
    let reset_system = RESET_SYSTEM.load(Ordering::Acquire);
    if reset_system != 0 {
        // SAFETY: Captured from the runtime-services table; regions are
        // identity-mapped. Does not return on success.
        unsafe {
            let reset: ResetSystemFn = core::mem::transmute(reset_system);
            reset(reset_type, 0, 0, core::ptr::null_mut());
        }
    }
}

/// Forces a reset without firmware help: an empty IDT turns the next
/// interrupt into a triple fault.
fn triple_fault() -> ! {
    #[repr(C, packed)]
    struct NullIdt {
        limit: u16,
        base: u64,
    }
    let null_idt = NullIdt { limit: 0, base: 0 };
    // SAFETY: Deliberate machine reset; nothing survives this.
    unsafe {
        core::arch::asm!("lidt [{}]", "int3", in(reg) &null_idt, options(noreturn));
    }
}

/// Warm-reboots the machine (`SYS_RESET`).
pub fn reset() -> ! {
    crate::kinfo!("power: reset requested");
    reset_via_firmware(EFI_RESET_COLD);
    triple_fault()
}

/// Powers the machine off (`SYS_SHUTDOWN`); falls back to a reset if the
/// firmware call returns.
pub fn shutdown() -> ! {
    crate::kinfo!("power: shutdown requested");
    reset_via_firmware(EFI_RESET_SHUTDOWN);
    triple_fault()
}
