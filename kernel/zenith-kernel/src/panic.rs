//! Fatal-fault diagnostics: the boxed kernel panic screen.
//!
//! Exception stubs capture a [`PanicFrame`] and hand it to [`render`], which
//! draws a box-drawing diagnostic (meditation string, decoded error code,
//! CR2 for page faults, register dump) into any `fmt::Write` target. The
//! actual halt lives in the kernel-only panic handler at the bottom.

use core::fmt::{self, Write};

/// Width of the panic box in character cells.
const BOX_WIDTH: usize = 72;

/// CPU state captured by an exception stub.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct PanicFrame {
    /// Exception vector (0..31).
    pub vector: u64,
    /// Hardware error code, or 0 for vectors without one.
    pub error_code: u64,
    /// CR2 at the time of a page fault.
    pub cr2: u64,
    /// Saved instruction pointer.
    pub rip: u64,
    /// Saved code segment.
    pub cs: u64,
    /// Saved RFLAGS.
    pub rflags: u64,
    /// Saved stack pointer.
    pub rsp: u64,
    /// Saved stack segment.
    pub ss: u64,
}

/// Names of the architectural exception vectors.
const EXCEPTION_NAMES: [&str; 32] = [
    "Divide Error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 Floating-Point",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point",
    "Virtualization",
    "Control Protection",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Hypervisor Injection",
    "VMM Communication",
    "Security Exception",
    "Reserved",
];

/// Human name for an exception vector.
#[must_use]
pub fn exception_name(vector: u64) -> &'static str {
    EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("Unknown")
}

fn boxed_line(out: &mut dyn Write, text: &str) -> fmt::Result {
    let inner = BOX_WIDTH - 4;
    write!(out, "│ ")?;
    let mut written = 0;
    for ch in text.chars().take(inner) {
        out.write_char(ch)?;
        written += 1;
    }
    for _ in written..inner {
        out.write_char(' ')?;
    }
    writeln!(out, " │")
}

fn boxed_hex(out: &mut dyn Write, label: &str, value: u64) -> fmt::Result {
    let mut line = heapless::String::<{ BOX_WIDTH }>::new();
    let _ = write!(line, "  {label}: {value:#018x}");
    boxed_line(out, &line)
}

fn separator(out: &mut dyn Write) -> fmt::Result {
    write!(out, "├")?;
    for _ in 0..BOX_WIDTH - 2 {
        write!(out, "─")?;
    }
    writeln!(out, "┤")
}

/// Draws the full panic box for `meditation` and an optional CPU frame.
///
/// # Errors
///
/// Propagates formatter errors from `out`.
pub fn render(out: &mut dyn Write, meditation: &str, frame: Option<&PanicFrame>) -> fmt::Result {
    write!(out, "┌")?;
    for _ in 0..BOX_WIDTH - 2 {
        write!(out, "─")?;
    }
    writeln!(out, "┐")?;

    boxed_line(out, "!!! KERNEL PANIC !!!")?;
    boxed_line(out, "")?;
    boxed_line(out, "System halted. Please reboot.")?;
    boxed_line(out, "")?;
    separator(out)?;
    boxed_line(out, "Meditation:")?;
    boxed_line(out, meditation)?;
    boxed_line(out, "")?;

    if let Some(frame) = frame {
        separator(out)?;
        boxed_line(out, "CPU State:")?;
        {
            let mut line = heapless::String::<{ BOX_WIDTH }>::new();
            let _ = write!(
                line,
                "  Vector {} ({})",
                frame.vector,
                exception_name(frame.vector)
            );
            boxed_line(out, &line)?;
        }

        if frame.vector == 0xE {
            boxed_hex(out, "Faulting Address (CR2)", frame.cr2)?;
            let code = crate::mm::paging::PageFaultCode::from_bits_truncate(frame.error_code);
            let mut line = heapless::String::<{ BOX_WIDTH }>::new();
            let _ = write!(
                line,
                "  Page Fault: {} {} {}{}{}",
                if code.contains(crate::mm::paging::PageFaultCode::PRESENT) {
                    "protection"
                } else {
                    "not-present"
                },
                if code.contains(crate::mm::paging::PageFaultCode::WRITE) {
                    "write"
                } else {
                    "read"
                },
                if code.contains(crate::mm::paging::PageFaultCode::USER) {
                    "user"
                } else {
                    "kernel"
                },
                if code.contains(crate::mm::paging::PageFaultCode::RESERVED_WRITE) {
                    " reserved-bit"
                } else {
                    ""
                },
                if code.contains(crate::mm::paging::PageFaultCode::INSTRUCTION_FETCH) {
                    " ifetch"
                } else {
                    ""
                },
            );
            boxed_line(out, &line)?;
        } else if frame.vector == 0xD {
            boxed_hex(out, "Error Code", frame.error_code)?;
        }

        separator(out)?;
        boxed_line(out, "Registers:")?;
        boxed_hex(out, "Instruction Pointer", frame.rip)?;
        boxed_hex(out, "Code Segment", frame.cs)?;
        boxed_hex(out, "Flags", frame.rflags)?;
        boxed_hex(out, "Stack Pointer", frame.rsp)?;
        boxed_hex(out, "Stack Segment", frame.ss)?;
    }

    boxed_line(out, "")?;
    write!(out, "└")?;
    for _ in 0..BOX_WIDTH - 2 {
        write!(out, "─")?;
    }
    writeln!(out, "┘")
}

// ---------------------------------------------------------------------------
// Kernel panic path
// ---------------------------------------------------------------------------

/// Renders the panic box to the log sinks and halts the CPU.
#[cfg(target_os = "none")]
pub fn panic_with_frame(meditation: &str, frame: Option<&PanicFrame>) -> ! {
    struct LogWriter;
    impl Write for LogWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            crate::kerr!("{s}");
            Ok(())
        }
    }
    let _ = render(&mut LogWriter, meditation, frame);
    crate::arch::halt_forever()
}

/// The Rust panic hook on the kernel target.
#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    struct MessageBuf(heapless::String<256>);
    impl Write for MessageBuf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let _ = self.0.push_str(s);
            Ok(())
        }
    }
    let mut message = MessageBuf(heapless::String::new());
    let _ = write!(message, "{}", info.message());
    panic_with_frame(&message.0, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;

    #[test]
    fn exception_names_cover_key_vectors() {
        assert_eq!(exception_name(0xE), "Page Fault");
        assert_eq!(exception_name(0xD), "General Protection Fault");
        assert_eq!(exception_name(8), "Double Fault");
        assert_eq!(exception_name(99), "Unknown");
    }

    #[test]
    fn render_page_fault_box() {
        let frame = PanicFrame {
            vector: 0xE,
            error_code: 0b111, // present | write | user
            cr2: 0xDEAD_B000,
            rip: 0x40_1000,
            cs: 0x20 | 3,
            rflags: 0x202,
            rsp: 0x7FFF_F000,
            ss: 0x18 | 3,
        };
        let mut out = String::new();
        render(&mut out, "Page fault in user mode", Some(&frame)).unwrap();

        assert!(out.contains("KERNEL PANIC"));
        assert!(out.contains("Page fault in user mode"));
        assert!(out.contains("Vector 14 (Page Fault)"));
        assert!(out.contains("0x00000000deadb000"));
        assert!(out.contains("protection write user"));
    }

    #[test]
    fn render_without_frame_is_just_banner() {
        let mut out = String::new();
        render(&mut out, "heap bootstrap failed", None).unwrap();
        assert!(out.contains("heap bootstrap failed"));
        assert!(!out.contains("Registers:"));
    }

    #[test]
    fn box_lines_have_uniform_width() {
        let mut out = String::new();
        render(&mut out, "x", None).unwrap();
        for line in out.lines() {
            assert_eq!(line.chars().count(), BOX_WIDTH, "line: {line}");
        }
    }
}
