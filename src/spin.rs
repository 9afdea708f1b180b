//! A spinning [`RawMutex`] implementation.
//!
//! [`Spinlock`] is the raw lock underneath both [`blocking::Mutex`] and
//! [`SpinCriticalSection`]. It will block the current CPU core (or thread, if
//! running in an environment with threads) until the lock is released by
//! another core, by issuing yield or pause instructions in a loop.
//!
//! [`blocking::Mutex`]: crate::blocking::Mutex
//! [`SpinCriticalSection`]: crate::critical::SpinCriticalSection
use crate::{
    blocking::RawMutex,
    loom::sync::atomic::{AtomicBool, Ordering::*},
    util::Backoff,
};

/// A spinlock-based [`RawMutex`] implementation.
///
/// This mutex will spin with an exponential backoff while waiting for the lock
/// to become available.
#[derive(Debug)]
pub struct Spinlock {
    locked: AtomicBool,
}

// === impl Spinlock ===

impl Spinlock {
    loom_const_fn! {
        /// Returns a new `Spinlock`, in the unlocked state.
        #[must_use]
        pub fn new() -> Self {
            Self { locked: AtomicBool::new(false) }
        }
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for Spinlock {
    #[cfg_attr(test, track_caller)]
    fn lock(&self) {
        let mut boff = Backoff::default();
        while test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_err())
        {
            while test_dbg!(self.is_locked()) {
                boff.spin();
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    fn try_lock(&self) -> bool {
        test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_ok())
    }

    #[cfg_attr(test, track_caller)]
    #[inline]
    unsafe fn unlock(&self) {
        test_dbg!(self.locked.store(false, Release));
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock() {
        let lock = Spinlock::new();
        assert!(!lock.is_locked());

        lock.lock();
        assert!(lock.is_locked());
        assert!(!lock.try_lock());

        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }
}
