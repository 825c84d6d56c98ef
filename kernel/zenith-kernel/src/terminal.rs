//! Text terminal over the framebuffer.
//!
//! The kernel side owns the character grid, cursor, scrolling, and ANSI-ish
//! color state; actual glyph rasterization is delegated to a [`TermOutput`]
//! implementation supplied by the display driver (an external collaborator).
//! `SYS_TERMSIZE` and `SYS_TERMSCALE` read and reshape this surface.

use alloc::boxed::Box;

use zenith_core::sync::SpinLock;

/// Default foreground color (light grey, 0xRRGGBB).
pub const DEFAULT_FG: u32 = 0x00D0_D0D0;

/// Default background color.
pub const DEFAULT_BG: u32 = 0x0000_0000;

/// Tab stop width in cells.
const TAB_WIDTH: usize = 8;

/// Glyph rasterization contract implemented by the display driver.
pub trait TermOutput: Send {
    /// Draws one glyph cell.
    fn put_glyph(&mut self, col: usize, row: usize, byte: u8, fg: u32, bg: u32);
    /// Moves every row up by one, clearing the last row.
    fn scroll_up(&mut self, bg: u32);
    /// Clears the whole surface.
    fn clear(&mut self, bg: u32);
}

/// The terminal state machine.
pub struct Terminal {
    output: Box<dyn TermOutput>,
    cols: usize,
    rows: usize,
    cursor_col: usize,
    cursor_row: usize,
    fg: u32,
    bg: u32,
    /// Integer glyph scale factor (1 = native cell size).
    scale: usize,
    /// Unscaled surface geometry, kept for rescale math.
    base_cols: usize,
    base_rows: usize,
}

impl Terminal {
    /// Creates a terminal of `cols` × `rows` cells over `output`.
    #[must_use]
    pub fn new(output: Box<dyn TermOutput>, cols: usize, rows: usize) -> Self {
        let mut terminal = Self {
            output,
            cols,
            rows,
            cursor_col: 0,
            cursor_row: 0,
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            scale: 1,
            base_cols: cols,
            base_rows: rows,
        };
        terminal.output.clear(terminal.bg);
        terminal
    }

    /// Terminal size in cells: `(cols, rows)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// Current glyph scale.
    #[must_use]
    pub fn scale(&self) -> usize {
        self.scale
    }

    /// Applies an integer glyph scale, shrinking the cell grid accordingly
    /// and clearing the screen.
    pub fn set_scale(&mut self, scale: usize) {
        let scale = scale.clamp(1, 4);
        self.scale = scale;
        self.cols = (self.base_cols / scale).max(1);
        self.rows = (self.base_rows / scale).max(1);
        self.cursor_col = 0;
        self.cursor_row = 0;
        self.output.clear(self.bg);
    }

    /// Sets the drawing colors.
    pub fn set_colors(&mut self, fg: u32, bg: u32) {
        self.fg = fg;
        self.bg = bg;
    }

    /// Clears the screen and homes the cursor.
    pub fn clear(&mut self) {
        self.output.clear(self.bg);
        self.cursor_col = 0;
        self.cursor_row = 0;
    }

    fn newline(&mut self) {
        self.cursor_col = 0;
        if self.cursor_row + 1 == self.rows {
            self.output.scroll_up(self.bg);
        } else {
            self.cursor_row += 1;
        }
    }

    /// Writes one byte, interpreting `\n`, `\r`, `\t`, and backspace.
    pub fn put_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\r' => self.cursor_col = 0,
            b'\t' => {
                let next_stop = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                while self.cursor_col < next_stop.min(self.cols) {
                    self.put_byte(b' ');
                    if self.cursor_col == 0 {
                        break; // wrapped
                    }
                }
            }
            0x08 => {
                if self.cursor_col > 0 {
                    self.cursor_col -= 1;
                    self.output.put_glyph(self.cursor_col, self.cursor_row, b' ', self.fg, self.bg);
                }
            }
            byte => {
                self.output.put_glyph(self.cursor_col, self.cursor_row, byte, self.fg, self.bg);
                self.cursor_col += 1;
                if self.cursor_col == self.cols {
                    self.newline();
                }
            }
        }
    }

    /// Writes a string.
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.put_byte(byte);
        }
    }
}

// ---------------------------------------------------------------------------
// Global terminal + log sink
// ---------------------------------------------------------------------------

static TERMINAL: SpinLock<Option<Terminal>> = SpinLock::new(None);

/// Installs the global terminal.
pub fn init(output: Box<dyn TermOutput>, cols: usize, rows: usize) {
    let mut terminal = TERMINAL.lock();
    assert!(terminal.is_none(), "terminal already initialized");
    *terminal = Some(Terminal::new(output, cols, rows));
}

/// Runs a closure with the global terminal, if initialized.
pub fn with_terminal<R>(f: impl FnOnce(&mut Terminal) -> R) -> Option<R> {
    let mut terminal = TERMINAL.lock();
    terminal.as_mut().map(f)
}

/// A [`crate::log::LogSink`] writing to the global terminal.
pub struct TerminalSink {
    max_level: crate::log::LogLevel,
}

impl TerminalSink {
    /// Creates a sink that forwards messages up to `max_level`.
    #[must_use]
    pub fn new(max_level: crate::log::LogLevel) -> Self {
        Self { max_level }
    }
}

impl crate::log::LogSink for TerminalSink {
    fn write_str(&self, s: &str) {
        // try_lock mirrors the logger: never deadlock from an ISR.
        if let Some(mut terminal) = TERMINAL.try_lock() {
            if let Some(terminal) = terminal.as_mut() {
                terminal.write_str(s);
            }
        }
    }

    fn max_level(&self) -> crate::log::LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "terminal"
    }
}
