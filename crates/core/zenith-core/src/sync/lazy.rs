//! Lazy initialization for `no_std` statics.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// A value initialized on first access.
///
/// Spin-based equivalent of `std::sync::LazyLock`. If multiple CPUs race to
/// initialize, one runs the closure and the others spin until the value is
/// ready. With the kernel's `panic = abort` a panicking initializer halts the
/// machine, so no poisoning state is tracked.
pub struct LazyLock<T, F = fn() -> T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    init: UnsafeCell<Option<F>>,
}

// SAFETY: The state machine guarantees the value is written exactly once and
// fully visible (Release store of READY) before any reader dereferences it.
unsafe impl<T: Send + Sync, F: Send> Send for LazyLock<T, F> {}
unsafe impl<T: Send + Sync, F: Send> Sync for LazyLock<T, F> {}

impl<T, F: FnOnce() -> T> LazyLock<T, F> {
    /// Creates a new `LazyLock` with the given initializer.
    pub const fn new(init: F) -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            init: UnsafeCell::new(Some(init)),
        }
    }

    fn force(&self) -> &T {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY means the value was fully written.
            return unsafe { (*self.value.get()).assume_init_ref() };
        }

        if self
            .state
            .compare_exchange(UNINIT, INITIALIZING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // SAFETY: We won the race; no other thread touches `init` or
            // `value` while the state is INITIALIZING.
            let init = unsafe { (*self.init.get()).take() }.expect("LazyLock initializer missing");
            let value = init();
            // SAFETY: Sole writer in INITIALIZING state.
            unsafe { (*self.value.get()).write(value) };
            self.state.store(READY, Ordering::Release);
        } else {
            while self.state.load(Ordering::Acquire) != READY {
                core::hint::spin_loop();
            }
        }

        // SAFETY: State is READY.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T, F: FnOnce() -> T> Deref for LazyLock<T, F> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.force()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn initializes_on_first_access() {
        let lazy = LazyLock::new(|| 7);
        assert_eq!(*lazy, 7);
    }

    #[test]
    fn initializer_runs_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let lazy = LazyLock::new(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            1
        });
        assert_eq!(*lazy, 1);
        assert_eq!(*lazy, 1);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
