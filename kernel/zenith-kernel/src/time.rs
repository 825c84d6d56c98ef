//! Timekeeping: the 1 kHz tick counter and boot-captured wall time.
//!
//! The APIC timer ISR calls [`on_tick`] once per millisecond, so ticks and
//! milliseconds coincide. Wall time is read once from UEFI `GetTime` at
//! boot; [`current_datetime`] adds elapsed whole seconds to that reference.

use core::sync::atomic::{AtomicU64, Ordering};

use zenith_core::sync::SpinLock;

/// Calendar timestamp, as captured from firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct DateTime {
    /// Full year (e.g. 2026).
    pub year: u16,
    /// Month 1..=12.
    pub month: u8,
    /// Day of month 1..=31.
    pub day: u8,
    /// Hour 0..=23.
    pub hour: u8,
    /// Minute 0..=59.
    pub minute: u8,
    /// Second 0..=59.
    pub second: u8,
}

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Wall-clock reference: the firmware time and the tick count when it was
/// captured.
static BOOT_TIME: SpinLock<Option<(DateTime, u64)>> = SpinLock::new(None);

/// Timer-interrupt hook: advances the tick counter by one.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Monotonic tick count since boot (1 tick = 1 ms).
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds since boot.
#[must_use]
pub fn now_ms() -> u64 {
    ticks()
}

/// Stores the firmware wall time captured during boot.
pub fn set_boot_time(datetime: DateTime) {
    *BOOT_TIME.lock() = Some((datetime, ticks()));
}

fn days_in_month(year: u16, month: u8) -> u8 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Adds whole seconds to a [`DateTime`], carrying through the calendar.
#[must_use]
pub fn datetime_add_seconds(mut datetime: DateTime, seconds: u64) -> DateTime {
    let total = u64::from(datetime.second) + seconds;
    datetime.second = (total % 60) as u8;
    let total = u64::from(datetime.minute) + total / 60;
    datetime.minute = (total % 60) as u8;
    let total = u64::from(datetime.hour) + total / 60;
    datetime.hour = (total % 24) as u8;

    let mut days = total / 24;
    while days > 0 {
        datetime.day += 1;
        if datetime.day > days_in_month(datetime.year, datetime.month) {
            datetime.day = 1;
            datetime.month += 1;
            if datetime.month > 12 {
                datetime.month = 1;
                datetime.year += 1;
            }
        }
        days -= 1;
    }
    datetime
}

/// Current wall time: the boot reference advanced by elapsed seconds.
///
/// Returns the zero date before the reference is captured.
#[must_use]
pub fn current_datetime() -> DateTime {
    let Some((reference, reference_ticks)) = *BOOT_TIME.lock() else {
        return DateTime::default();
    };
    let elapsed_s = ticks().saturating_sub(reference_ticks) / 1000;
    datetime_add_seconds(reference, elapsed_s)
}

/// Sleeps at least `ms` milliseconds, yielding the CPU between checks.
#[cfg(target_os = "none")]
pub fn sleep_ms(ms: u64) {
    let deadline = now_ms() + ms;
    while now_ms() < deadline {
        crate::proc::sched::yield_now();
    }
}

/// Test hook: advances the tick counter directly.
#[cfg(test)]
pub fn test_advance_ms(ms: u64) {
    TICKS.fetch_add(ms, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_advance() {
        let before = ticks();
        on_tick();
        on_tick();
        assert!(ticks() >= before + 2);
    }

    #[test]
    fn add_seconds_carries_minutes_and_hours() {
        let datetime = DateTime { year: 2026, month: 8, day: 1, hour: 23, minute: 59, second: 30 };
        let later = datetime_add_seconds(datetime, 45);
        assert_eq!((later.hour, later.minute, later.second), (0, 0, 15));
        assert_eq!(later.day, 2);
    }

    #[test]
    fn add_seconds_carries_month_end() {
        let datetime = DateTime { year: 2026, month: 2, day: 28, hour: 23, minute: 0, second: 0 };
        let later = datetime_add_seconds(datetime, 3600);
        assert_eq!((later.month, later.day), (3, 1));
    }

    #[test]
    fn add_seconds_respects_leap_year() {
        let datetime = DateTime { year: 2028, month: 2, day: 28, hour: 23, minute: 0, second: 0 };
        let later = datetime_add_seconds(datetime, 3600);
        assert_eq!((later.month, later.day), (2, 29));
    }

    #[test]
    fn add_seconds_carries_year_end() {
        let datetime = DateTime { year: 2025, month: 12, day: 31, hour: 23, minute: 59, second: 59 };
        let later = datetime_add_seconds(datetime, 1);
        assert_eq!((later.year, later.month, later.day), (2026, 1, 1));
        assert_eq!((later.hour, later.minute, later.second), (0, 0, 0));
    }
}
