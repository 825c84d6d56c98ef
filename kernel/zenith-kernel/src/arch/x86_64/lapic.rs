//! Local APIC access through its memory-mapped register file.
//!
//! Registers are 32-bit slots on 16-byte strides, accessed volatile via the
//! HHDM alias established at bring-up.

use core::sync::atomic::{AtomicU64, Ordering};

/// Spurious Interrupt Vector Register.
const REG_SVR: u32 = 0xF0;
/// Local APIC ID.
const REG_ID: u32 = 0x20;
/// Task Priority Register.
const REG_TPR: u32 = 0x80;
/// End Of Interrupt.
const REG_EOI: u32 = 0xB0;
/// Timer LVT entry.
const REG_TIMER_LVT: u32 = 0x320;
/// Timer initial count.
const REG_TIMER_INITIAL: u32 = 0x380;
/// Timer current count.
const REG_TIMER_CURRENT: u32 = 0x390;
/// Timer divide configuration.
const REG_TIMER_DIVIDE: u32 = 0x3E0;

/// SVR bit enabling the APIC.
const SVR_ENABLE: u32 = 1 << 8;

/// Timer LVT mode bit: periodic.
const LVT_PERIODIC: u32 = 1 << 17;
/// Timer LVT mask bit.
const LVT_MASKED: u32 = 1 << 16;

/// Divide configuration value for divide-by-16.
pub const DIVIDE_BY_16: u32 = 0x3;

/// Virtual base of the LAPIC register file; 0 before bring-up.
static LAPIC_BASE: AtomicU64 = AtomicU64::new(0);

fn read(reg: u32) -> u32 {
    let base = LAPIC_BASE.load(Ordering::Acquire);
    debug_assert!(base != 0, "LAPIC accessed before init");
    // SAFETY: The base was mapped during bring-up and the mapping is
    // permanent; register offsets stay within the mapped page.
    unsafe { core::ptr::read_volatile((base + u64::from(reg)) as *const u32) }
}

fn write(reg: u32, value: u32) {
    let base = LAPIC_BASE.load(Ordering::Acquire);
    debug_assert!(base != 0, "LAPIC accessed before init");
    // SAFETY: As above.
    unsafe { core::ptr::write_volatile((base + u64::from(reg)) as *mut u32, value) }
}

/// Enables the local APIC at the given (already mapped) virtual base:
/// SVR = enable | spurious vector, TPR = 0 to accept everything.
///
/// # Safety
///
/// `virt_base` must be the LAPIC MMIO region mapped uncached.
pub unsafe fn init(virt_base: u64, spurious_vector: u8) {
    LAPIC_BASE.store(virt_base, Ordering::Release);
    write(REG_SVR, SVR_ENABLE | u32::from(spurious_vector));
    write(REG_TPR, 0);
    crate::kinfo!("lapic: enabled, id {}", id());
}

/// The boot CPU's APIC ID.
#[must_use]
pub fn id() -> u8 {
    (read(REG_ID) >> 24) as u8
}

/// Signals end-of-interrupt. A no-op before bring-up so early spurious
/// paths cannot fault.
pub fn eoi() {
    if LAPIC_BASE.load(Ordering::Acquire) != 0 {
        write(REG_EOI, 0);
    }
}

/// Starts the timer free-running (masked, max count) for calibration.
pub fn timer_start_calibration() {
    write(REG_TIMER_DIVIDE, DIVIDE_BY_16);
    write(REG_TIMER_LVT, LVT_MASKED);
    write(REG_TIMER_INITIAL, u32::MAX);
}

/// Elapsed timer ticks since calibration start.
#[must_use]
pub fn timer_elapsed() -> u32 {
    u32::MAX - read(REG_TIMER_CURRENT)
}

/// Stops the timer.
pub fn timer_stop() {
    write(REG_TIMER_INITIAL, 0);
}

/// Starts the timer in periodic mode on `vector` with the given initial
/// count (divide-by-16).
pub fn timer_start_periodic(vector: u8, initial_count: u32) {
    write(REG_TIMER_DIVIDE, DIVIDE_BY_16);
    write(REG_TIMER_LVT, u32::from(vector) | LVT_PERIODIC);
    write(REG_TIMER_INITIAL, initial_count);
}
