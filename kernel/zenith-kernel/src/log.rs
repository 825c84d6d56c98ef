//! Kernel logging.
//!
//! Log lines fan out to registered [`LogSink`]s (serial UART, framebuffer
//! terminal). Formatting happens directly into each sink through
//! `core::fmt::Write`, so logging never allocates and works from the first
//! instruction of boot once a sink exists. Before [`init`], messages are
//! dropped.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use zenith_core::sync::SpinLock;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Unrecoverable or data-losing conditions.
    Error,
    /// Unexpected but tolerated conditions.
    Warn,
    /// Boot progress and notable events.
    Info,
    /// Development diagnostics.
    Debug,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => " WARN",
            Self::Info => " INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// An output target for log lines.
pub trait LogSink: Send {
    /// Writes a string fragment.
    fn write_str(&self, s: &str);
    /// Most verbose level this sink accepts.
    fn max_level(&self) -> LogLevel;
    /// Name for diagnostics.
    fn name(&self) -> &str;
}

struct Logger {
    sinks: Vec<Box<dyn LogSink>>,
}

static LOGGER: SpinLock<Option<Logger>> = SpinLock::new(None);

/// While set, `Info`/`Debug` lines are muted so boot banners do not scroll
/// over early userspace output.
static SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Installs the logger (idempotent: a second call is ignored).
pub fn init() {
    let mut logger = LOGGER.lock();
    if logger.is_none() {
        *logger = Some(Logger { sinks: Vec::new() });
    }
}

/// Registers an output sink.
pub fn add_sink(sink: Box<dyn LogSink>) {
    let mut logger = LOGGER.lock();
    if let Some(logger) = logger.as_mut() {
        logger.sinks.push(sink);
    }
}

/// Mutes (or restores) sub-`Warn` output.
pub fn set_suppressed(suppressed: bool) {
    SUPPRESSED.store(suppressed, Ordering::Release);
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Writes one formatted line to every sink accepting `level`.
///
/// Called through the `kerr!`/`kwarn!`/`kinfo!`/`kdebug!` macros.
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level > LogLevel::Warn && SUPPRESSED.load(Ordering::Acquire) {
        return;
    }
    // try_lock: a log call from an ISR that interrupted a logging thread
    // must not deadlock; dropping the line is the lesser evil.
    let Some(logger) = LOGGER.try_lock() else {
        return;
    };
    let Some(logger) = logger.as_ref() else {
        return;
    };
    for sink in &logger.sinks {
        if level <= sink.max_level() {
            use fmt::Write as _;
            let mut writer = SinkWriter(sink.as_ref());
            let _ = write!(writer, "[{}] ", level.label());
            let _ = writer.write_fmt(args);
            let _ = writer.write_str("\n");
        }
    }
}

// ---------------------------------------------------------------------------
// Serial sink (COM1 16550)
// ---------------------------------------------------------------------------

/// A sink writing to the COM1 16550 UART.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub struct SerialSink {
    max_level: LogLevel,
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl SerialSink {
    const COM1: u16 = 0x3F8;

    /// Initializes COM1 (115200 8N1, FIFOs on) and returns the sink.
    #[must_use]
    pub fn new(max_level: LogLevel) -> Self {
        use crate::arch::x86_64::port::outb;
        // SAFETY: Standard 16550 initialization on the conventional COM1
        // ports.
        unsafe {
            outb(Self::COM1 + 1, 0x00); // mask UART interrupts
            outb(Self::COM1 + 3, 0x80); // DLAB on
            outb(Self::COM1, 0x01); // divisor 1 = 115200 baud
            outb(Self::COM1 + 1, 0x00);
            outb(Self::COM1 + 3, 0x03); // 8N1, DLAB off
            outb(Self::COM1 + 2, 0xC7); // FIFOs enabled and cleared
            outb(Self::COM1 + 4, 0x0B); // DTR | RTS | OUT2
        }
        Self { max_level }
    }

    fn write_byte(byte: u8) {
        use crate::arch::x86_64::port::{inb, outb};
        // SAFETY: Polled transmit on the initialized COM1.
        unsafe {
            while inb(Self::COM1 + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            outb(Self::COM1, byte);
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                Self::write_byte(b'\r');
            }
            Self::write_byte(byte);
        }
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "serial"
    }
}

/// Logs at `Error` level.
#[macro_export]
macro_rules! kerr {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

/// Logs at `Warn` level.
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

/// Logs at `Info` level.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Logs at `Debug` level.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::{Arc, Mutex};

    struct CaptureSink {
        lines: Arc<Mutex<String>>,
        max: LogLevel,
    }

    impl LogSink for CaptureSink {
        fn write_str(&self, s: &str) {
            self.lines.lock().unwrap().push_str(s);
        }

        fn max_level(&self) -> LogLevel {
            self.max
        }

        fn name(&self) -> &str {
            "capture"
        }
    }

    /// Serializes tests that share the global logger.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    fn fresh_capture(max: LogLevel) -> (std::sync::MutexGuard<'static, ()>, Arc<Mutex<String>>) {
        let guard = TEST_GUARD.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        // The logger static is process-wide in tests; reset it.
        *LOGGER.lock() = Some(Logger { sinks: Vec::new() });
        set_suppressed(false);
        let lines = Arc::new(Mutex::new(String::new()));
        add_sink(Box::new(CaptureSink { lines: lines.clone(), max }));
        (guard, lines)
    }

    #[test]
    fn levels_filter_per_sink() {
        let (_guard, lines) = fresh_capture(LogLevel::Warn);
        log(LogLevel::Error, format_args!("bad"));
        log(LogLevel::Info, format_args!("chatty"));
        let captured = lines.lock().unwrap().clone();
        assert!(captured.contains("bad"));
        assert!(!captured.contains("chatty"));
    }

    #[test]
    fn suppression_mutes_info_only() {
        let (_guard, lines) = fresh_capture(LogLevel::Debug);
        set_suppressed(true);
        log(LogLevel::Info, format_args!("banner"));
        log(LogLevel::Warn, format_args!("still-visible"));
        set_suppressed(false);
        let captured = lines.lock().unwrap().clone();
        assert!(!captured.contains("banner"));
        assert!(captured.contains("still-visible"));
    }

    #[test]
    fn line_carries_level_label() {
        let (_guard, lines) = fresh_capture(LogLevel::Debug);
        log(LogLevel::Debug, format_args!("x = {}", 42));
        let captured = lines.lock().unwrap().clone();
        assert!(captured.contains("[DEBUG] x = 42\n"));
    }
}
