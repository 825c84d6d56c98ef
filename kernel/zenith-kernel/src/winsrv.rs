//! Window registry for the userspace compositor.
//!
//! The kernel only brokers: it tracks window records (owner, geometry,
//! dirty flag, event queue) and the physical pages backing each window's
//! pixel buffer. Drawing and compositing happen entirely in userspace; the
//! compositor maps a window's pages into its own address space through
//! `SYS_WINMAP`.

use alloc::vec::Vec;

use zenith_core::PhysAddr;
use zenith_core::sync::SpinLock;

/// Maximum live windows.
pub const MAX_WINDOWS: usize = 16;

/// Events queued per window.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// An event delivered to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinEvent {
    /// Keyboard input routed to the focused window.
    Key(crate::input::KeyEvent),
    /// Pointer state inside the window.
    Mouse {
        /// X relative to the window.
        x: i32,
        /// Y relative to the window.
        y: i32,
        /// Wheel movement.
        scroll: i32,
        /// Current button bitmask.
        buttons: u8,
        /// Previous button bitmask, for edge detection.
        prev_buttons: u8,
    },
    /// The compositor resized the window.
    Resize {
        /// New width in pixels.
        width: i32,
        /// New height in pixels.
        height: i32,
    },
    /// The user asked the window to close.
    Close,
}

/// One window record.
pub struct Window {
    /// Registry-unique id.
    pub id: i32,
    /// Owning process.
    pub owner_pid: u32,
    /// UTF-8 title, truncated to fit.
    pub title: heapless::String<64>,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Physical pages of the 32-bpp pixel buffer.
    pub frames: Vec<PhysAddr>,
    /// Set by `present`, cleared when the compositor consumes the buffer.
    pub dirty: bool,
    events: heapless::Deque<WinEvent, EVENT_QUEUE_DEPTH>,
}

/// The window table.
pub struct WindowRegistry {
    windows: [Option<Window>; MAX_WINDOWS],
    next_id: i32,
}

impl WindowRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: [const { None }; MAX_WINDOWS],
            next_id: 1,
        }
    }

    /// Registers a window whose pixel buffer is backed by `frames`.
    ///
    /// Returns the new window id, or `None` when the table is full.
    pub fn create(
        &mut self,
        owner_pid: u32,
        title: &str,
        width: i32,
        height: i32,
        frames: Vec<PhysAddr>,
    ) -> Option<i32> {
        let slot = self.windows.iter().position(Option::is_none)?;
        let id = self.next_id;
        self.next_id += 1;

        let mut stored_title = heapless::String::new();
        for ch in title.chars() {
            if stored_title.push(ch).is_err() {
                break;
            }
        }

        self.windows[slot] = Some(Window {
            id,
            owner_pid,
            title: stored_title,
            width,
            height,
            frames,
            dirty: false,
            events: heapless::Deque::new(),
        });
        Some(id)
    }

    fn find_mut(&mut self, id: i32) -> Option<&mut Window> {
        self.windows.iter_mut().flatten().find(|w| w.id == id)
    }

    /// Removes a window, returning its pixel frames for reclamation.
    pub fn destroy(&mut self, id: i32) -> Option<Vec<PhysAddr>> {
        let slot = self
            .windows
            .iter_mut()
            .position(|w| w.as_ref().is_some_and(|w| w.id == id))?;
        let window = self.windows[slot].take()?;
        Some(window.frames)
    }

    /// Removes every window owned by `pid` (process teardown).
    pub fn destroy_owned_by(&mut self, pid: u32) -> Vec<Vec<PhysAddr>> {
        let mut reclaimed = Vec::new();
        for slot in &mut self.windows {
            if slot.as_ref().is_some_and(|w| w.owner_pid == pid) {
                if let Some(window) = slot.take() {
                    reclaimed.push(window.frames);
                }
            }
        }
        reclaimed
    }

    /// Marks a window's buffer dirty for the compositor.
    pub fn present(&mut self, id: i32) -> bool {
        match self.find_mut(id) {
            Some(window) => {
                window.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Clears the dirty flag (compositor consumed the buffer).
    pub fn clear_dirty(&mut self, id: i32) {
        if let Some(window) = self.find_mut(id) {
            window.dirty = false;
        }
    }

    /// Queues an event for a window; the oldest is dropped when full.
    pub fn send_event(&mut self, id: i32, event: WinEvent) -> bool {
        match self.find_mut(id) {
            Some(window) => {
                if window.events.is_full() {
                    let _ = window.events.pop_front();
                }
                let _ = window.events.push_back(event);
                true
            }
            None => false,
        }
    }

    /// Dequeues a window's next event.
    pub fn poll_event(&mut self, id: i32) -> Option<WinEvent> {
        self.find_mut(id)?.events.pop_front()
    }

    /// Visits every live window in creation order.
    pub fn enumerate(&self, mut f: impl FnMut(&Window)) {
        for window in self.windows.iter().flatten() {
            f(window);
        }
    }

    /// The pixel frames backing a window, for `SYS_WINMAP`.
    pub fn frames_of(&self, id: i32) -> Option<&[PhysAddr]> {
        self.windows
            .iter()
            .flatten()
            .find(|w| w.id == id)
            .map(|w| w.frames.as_slice())
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: SpinLock<WindowRegistry> = SpinLock::new(WindowRegistry {
    windows: [const { None }; MAX_WINDOWS],
    next_id: 1,
});

/// Runs a closure over the global window registry.
pub fn with_windows<R>(f: impl FnOnce(&mut WindowRegistry) -> R) -> R {
    f(&mut REGISTRY.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<PhysAddr> {
        (0..n).map(|i| PhysAddr::new((0x10_0000 + i * 0x1000) as u64)).collect()
    }

    #[test]
    fn create_assigns_monotonic_ids() {
        let mut registry = WindowRegistry::new();
        let a = registry.create(1, "term", 640, 480, frames(2)).unwrap();
        let b = registry.create(1, "clock", 100, 100, frames(1)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn table_capacity_enforced() {
        let mut registry = WindowRegistry::new();
        for i in 0..MAX_WINDOWS {
            assert!(registry.create(1, "w", 10, 10, frames(1)).is_some(), "slot {i}");
        }
        assert!(registry.create(1, "overflow", 10, 10, frames(1)).is_none());
    }

    #[test]
    fn destroy_returns_frames_and_frees_slot() {
        let mut registry = WindowRegistry::new();
        let id = registry.create(1, "w", 10, 10, frames(3)).unwrap();
        let reclaimed = registry.destroy(id).unwrap();
        assert_eq!(reclaimed.len(), 3);
        assert!(registry.destroy(id).is_none());
        assert!(registry.create(1, "again", 10, 10, frames(1)).is_some());
    }

    #[test]
    fn present_and_clear_dirty() {
        let mut registry = WindowRegistry::new();
        let id = registry.create(1, "w", 10, 10, frames(1)).unwrap();
        assert!(registry.present(id));
        let mut dirty = false;
        registry.enumerate(|w| dirty = w.dirty);
        assert!(dirty);
        registry.clear_dirty(id);
        registry.enumerate(|w| dirty = w.dirty);
        assert!(!dirty);
        assert!(!registry.present(999));
    }

    #[test]
    fn event_queue_roundtrip() {
        let mut registry = WindowRegistry::new();
        let id = registry.create(1, "w", 10, 10, frames(1)).unwrap();
        assert!(registry.send_event(id, WinEvent::Close));
        assert_eq!(registry.poll_event(id), Some(WinEvent::Close));
        assert_eq!(registry.poll_event(id), None);
    }

    #[test]
    fn teardown_reclaims_all_windows_of_pid() {
        let mut registry = WindowRegistry::new();
        registry.create(7, "a", 1, 1, frames(1)).unwrap();
        registry.create(7, "b", 1, 1, frames(2)).unwrap();
        let keep = registry.create(8, "c", 1, 1, frames(1)).unwrap();

        let reclaimed = registry.destroy_owned_by(7);
        assert_eq!(reclaimed.len(), 2);
        assert!(registry.frames_of(keep).is_some());
    }

    #[test]
    fn long_title_truncates() {
        let mut registry = WindowRegistry::new();
        let long = "x".repeat(100);
        let id = registry.create(1, &long, 1, 1, frames(1)).unwrap();
        let mut title_len = 0;
        registry.enumerate(|w| {
            if w.id == id {
                title_len = w.title.len();
            }
        });
        assert_eq!(title_len, 64);
    }
}
