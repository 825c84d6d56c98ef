//! ACPI-driven interrupt platform bring-up.
//!
//! Parses RSDP → XSDT → MADT, retires the legacy 8259s, enables the local
//! APIC, routes the ISA input devices through the I/O APIC (honoring MADT
//! source overrides), and calibrates the APIC timer against PIT channel 2
//! for the 1 kHz scheduler tick.

use zenith_acpi::{AcpiHandler, AcpiTables, MadtEntry};
use zenith_core::PhysAddr;

use super::interrupts::{IRQ_VECTOR_BASE, SPURIOUS_VECTOR};
use super::io_apic::{IoApic, Polarity, RedirectionEntry, TriggerMode};
use super::{lapic, pic, pit};
use crate::mm::{hhdm, vmm};
use crate::syscall::handlers::misc::register_device;
use crate::syscall::abi::DevInfo;

/// ISA keyboard IRQ, routed at bring-up.
const IRQ_KEYBOARD: u8 = 1;

/// ISA mouse IRQ, routed at bring-up.
const IRQ_MOUSE: u8 = 12;

/// Upper bound of stored local APIC records.
const MAX_CPUS: usize = 64;

/// Upper bound of stored interrupt source overrides.
const MAX_OVERRIDES: usize = 16;

/// ACPI physical memory is reached through the HHDM.
struct HhdmHandler;

// SAFETY: The HHDM covers all physical memory for the kernel's lifetime.
unsafe impl AcpiHandler for HhdmHandler {
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8] {
        let virt = hhdm::phys_to_virt(PhysAddr::new(phys));
        // SAFETY: Firmware tables live in reserved memory mapped by the HHDM.
        unsafe { core::slice::from_raw_parts(virt.as_ptr(), size) }
    }
}

/// An ISA IRQ rewrite parsed from a MADT interrupt source override.
#[derive(Clone, Copy)]
struct SourceOverride {
    source: u8,
    gsi: u32,
    polarity: Polarity,
    trigger: TriggerMode,
}

fn decode_override(source: u8, gsi: u32, flags: u16) -> SourceOverride {
    // MPS INTI flags: bits 0-1 polarity, bits 2-3 trigger mode;
    // "conforming" keeps the ISA defaults.
    let polarity = match flags & 0x3 {
        0b11 => Polarity::ActiveLow,
        _ => Polarity::ActiveHigh,
    };
    let trigger = match (flags >> 2) & 0x3 {
        0b11 => TriggerMode::Level,
        _ => TriggerMode::Edge,
    };
    SourceOverride {
        source,
        gsi,
        polarity,
        trigger,
    }
}

/// Brings up the whole interrupt platform. Fatal on missing or pre-2.0
/// ACPI — without the MADT there is no usable interrupt controller.
///
/// # Safety
///
/// Must run once, with interrupts disabled, after paging and the IDT are
/// in place.
pub unsafe fn init(rsdp: Option<PhysAddr>) {
    let rsdp = rsdp.expect("boot protocol provided no RSDP");
    let tables = AcpiTables::new(rsdp.as_u64(), HhdmHandler)
        .unwrap_or_else(|e| panic!("ACPI discovery failed: {e}"));
    let madt = tables
        .madt()
        .unwrap_or_else(|e| panic!("MADT unavailable: {e}"));

    // Walk the MADT once, collecting the interrupt topology.
    let mut lapic_phys = u64::from(madt.local_apic_address);
    let mut io_apic_info: Option<(u32, u32)> = None; // (address, gsi base)
    let mut overrides: heapless::Vec<SourceOverride, MAX_OVERRIDES> = heapless::Vec::new();
    let mut cpu_count = 0usize;

    for entry in madt.entries() {
        match entry {
            MadtEntry::LocalApic { flags, .. } => {
                if flags & 1 != 0 && cpu_count < MAX_CPUS {
                    cpu_count += 1;
                }
            }
            MadtEntry::IoApic {
                io_apic_address,
                gsi_base,
                ..
            } => {
                if io_apic_info.is_none() {
                    io_apic_info = Some((io_apic_address, gsi_base));
                }
            }
            MadtEntry::InterruptSourceOverride {
                source, gsi, flags, ..
            } => {
                let _ = overrides.push(decode_override(source, gsi, flags));
            }
            MadtEntry::LocalApicAddressOverride { address } => {
                lapic_phys = address;
            }
            _ => {}
        }
    }

    crate::kinfo!(
        "acpi: {} CPUs, LAPIC at {:#x}, {} source overrides",
        cpu_count,
        lapic_phys,
        overrides.len()
    );

    // Legacy PIC out of the way before the APIC goes live.
    // SAFETY: Interrupts are disabled.
    unsafe { pic::remap_and_disable() };

    // Local APIC.
    let lapic_virt = vmm::map_mmio_region(PhysAddr::new(lapic_phys), zenith_core::PAGE_SIZE as u64);
    // SAFETY: Just mapped uncached.
    unsafe { lapic::init(lapic_virt.as_u64(), SPURIOUS_VECTOR) };
    let bsp_apic_id = lapic::id();

    // I/O APIC: mask everything, then route the ISA input devices.
    let (ioapic_phys, gsi_base) = io_apic_info.expect("MADT describes no I/O APIC");
    let ioapic_virt = vmm::map_mmio_region(PhysAddr::new(u64::from(ioapic_phys)), zenith_core::PAGE_SIZE as u64);
    // SAFETY: Just mapped uncached.
    let ioapic = unsafe { IoApic::new(ioapic_virt.as_u64(), gsi_base) };

    for index in 0..=ioapic.max_redirection_entry() {
        ioapic.mask(index);
    }
    for irq in [IRQ_KEYBOARD, IRQ_MOUSE] {
        route_isa_irq(&ioapic, &overrides, irq, bsp_apic_id);
    }

    // Timer calibration: count APIC timer ticks across a 10 ms PIT window.
    lapic::timer_start_calibration();
    // SAFETY: Interrupts are disabled; channel 2 is otherwise unused.
    unsafe { pit::busy_wait_ms(10) };
    let elapsed = lapic::timer_elapsed();
    lapic::timer_stop();

    let ticks_per_ms = elapsed / 10;
    assert!(ticks_per_ms > 0, "APIC timer calibration returned zero");
    crate::kinfo!(
        "timer: {} ticks/ms (divide-by-16), starting 1 kHz periodic tick",
        ticks_per_ms
    );
    lapic::timer_start_periodic(IRQ_VECTOR_BASE, ticks_per_ms);

    register_device(DevInfo::new(0, "cpu0", "boot processor"));
    register_device(DevInfo::new(1, "lapic", "local APIC"));
    register_device(DevInfo::new(1, "ioapic", "I/O APIC"));
    register_device(DevInfo::new(2, "apic-timer", "1 kHz periodic"));
}

/// Programs one ISA IRQ through the I/O APIC: identity GSI mapping unless
/// an override redirects it, vector `32 + gsi`, unmasked, to the BSP.
fn route_isa_irq(
    ioapic: &IoApic,
    overrides: &[SourceOverride],
    irq: u8,
    bsp_apic_id: u8,
) {
    let (gsi, polarity, trigger) = overrides
        .iter()
        .find(|o| o.source == irq)
        .map_or((u32::from(irq), Polarity::ActiveHigh, TriggerMode::Edge), |o| {
            (o.gsi, o.polarity, o.trigger)
        });

    if gsi < ioapic.gsi_base() || gsi - ioapic.gsi_base() > u32::from(ioapic.max_redirection_entry()) {
        crate::kwarn!("ioapic: IRQ {irq} routed to out-of-range GSI {gsi}");
        return;
    }

    let entry = RedirectionEntry {
        vector: IRQ_VECTOR_BASE + gsi as u8,
        polarity,
        trigger_mode: trigger,
        masked: false,
        destination: bsp_apic_id,
    };
    ioapic.set_entry((gsi - ioapic.gsi_base()) as u8, entry);
    crate::kdebug!("ioapic: IRQ {irq} -> GSI {gsi} (vector {})", IRQ_VECTOR_BASE + gsi as u8);
}
