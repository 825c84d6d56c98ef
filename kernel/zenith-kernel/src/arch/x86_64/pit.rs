//! PIT channel 2, used once: as the reference clock for calibrating the
//! APIC timer.

use super::port::{inb, io_wait, outb};

/// PIT oscillator frequency in Hz.
const PIT_FREQUENCY: u32 = 1_193_182;

const CHANNEL2_DATA: u16 = 0x42;
const COMMAND: u16 = 0x43;
const GATE_PORT: u16 = 0x61;

/// Busy-waits approximately `ms` milliseconds using channel 2 in one-shot
/// mode (the speaker gate, so channel 0 stays untouched).
///
/// # Safety
///
/// Must run with interrupts disabled during early bring-up; stomps the
/// speaker gate bits of port 0x61.
pub unsafe fn busy_wait_ms(ms: u32) {
    let count = (PIT_FREQUENCY / 1000) * ms;
    let count = u16::try_from(count).unwrap_or(u16::MAX);

    // SAFETY: Standard channel-2 one-shot programming.
    unsafe {
        // Channel 2, lobyte/hibyte, mode 0, binary.
        outb(COMMAND, 0xB0);

        // Gate low while loading the count.
        let gate = inb(GATE_PORT) & !0x03;
        outb(GATE_PORT, gate);

        outb(CHANNEL2_DATA, (count & 0xFF) as u8);
        io_wait();
        outb(CHANNEL2_DATA, (count >> 8) as u8);

        // Raise the gate to start counting.
        outb(GATE_PORT, gate | 0x01);

        // Output (bit 5) goes high when the count expires.
        while inb(GATE_PORT) & 0x20 == 0 {
            core::hint::spin_loop();
        }
    }
}
