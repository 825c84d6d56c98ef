//! Input queues: keyboard events and mouse state.
//!
//! The PS/2 (or USB HID) drivers are external collaborators; they feed this
//! module from their IRQ handlers via [`push_key`] and [`mouse_update`].
//! Syscalls 16–18 and 47–48 drain it.

use zenith_core::sync::SpinLock;

/// Capacity of the key event queue.
pub const KEY_QUEUE_DEPTH: usize = 64;

/// One keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct KeyEvent {
    /// Raw scancode.
    pub scancode: u8,
    /// Translated ASCII, or 0 when none applies.
    pub ascii: u8,
    /// Key pressed (`true`) or released.
    pub pressed: bool,
    /// Shift held.
    pub shift: bool,
    /// Control held.
    pub ctrl: bool,
    /// Alt held.
    pub alt: bool,
}

/// Mouse position, wheel, and buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MouseState {
    /// X position in pixels, clamped to the bounds.
    pub x: i32,
    /// Y position in pixels, clamped to the bounds.
    pub y: i32,
    /// Accumulated wheel movement since the last poll.
    pub scroll_delta: i32,
    /// Button bitmask (bit 0 left, 1 right, 2 middle).
    pub buttons: u8,
}

/// Shared input state.
pub struct InputState {
    keys: heapless::Deque<KeyEvent, KEY_QUEUE_DEPTH>,
    mouse: MouseState,
    bounds: (i32, i32),
}

impl InputState {
    /// Creates an empty input state with a 1×1 mouse area.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: heapless::Deque::new(),
            mouse: MouseState::default(),
            bounds: (1, 1),
        }
    }

    /// Queues a key event; the oldest is dropped when full.
    pub fn push_key(&mut self, event: KeyEvent) {
        if self.keys.is_full() {
            let _ = self.keys.pop_front();
        }
        let _ = self.keys.push_back(event);
    }

    /// Whether a key event is waiting.
    #[must_use]
    pub fn key_available(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Dequeues the next key event.
    pub fn pop_key(&mut self) -> Option<KeyEvent> {
        self.keys.pop_front()
    }

    /// Dequeues the next printable character (press events with ASCII).
    pub fn pop_char(&mut self) -> Option<u8> {
        while let Some(event) = self.keys.pop_front() {
            if event.pressed && event.ascii != 0 {
                return Some(event.ascii);
            }
        }
        None
    }

    /// Applies a relative mouse movement and button state.
    pub fn mouse_update(&mut self, dx: i32, dy: i32, scroll: i32, buttons: u8) {
        self.mouse.x = (self.mouse.x + dx).clamp(0, self.bounds.0 - 1);
        self.mouse.y = (self.mouse.y + dy).clamp(0, self.bounds.1 - 1);
        self.mouse.scroll_delta += scroll;
        self.mouse.buttons = buttons;
    }

    /// Reads the mouse state, consuming the accumulated wheel delta.
    pub fn take_mouse(&mut self) -> MouseState {
        let state = self.mouse;
        self.mouse.scroll_delta = 0;
        state
    }

    /// Sets the rectangle the cursor is clamped to.
    pub fn set_mouse_bounds(&mut self, width: i32, height: i32) {
        self.bounds = (width.max(1), height.max(1));
        self.mouse.x = self.mouse.x.clamp(0, self.bounds.0 - 1);
        self.mouse.y = self.mouse.y.clamp(0, self.bounds.1 - 1);
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

static INPUT: SpinLock<InputState> = SpinLock::new(InputState {
    keys: heapless::Deque::new(),
    mouse: MouseState {
        x: 0,
        y: 0,
        scroll_delta: 0,
        buttons: 0,
    },
    bounds: (1, 1),
});

/// Queues a key event from a driver IRQ handler.
pub fn push_key(event: KeyEvent) {
    INPUT.lock().push_key(event);
}

/// Applies a mouse packet from a driver IRQ handler.
pub fn mouse_update(dx: i32, dy: i32, scroll: i32, buttons: u8) {
    INPUT.lock().mouse_update(dx, dy, scroll, buttons);
}

/// Runs a closure over the global input state.
pub fn with_input<R>(f: impl FnOnce(&mut InputState) -> R) -> R {
    f(&mut INPUT.lock())
}
