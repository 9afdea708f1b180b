//! A per-waiter counting semaphore.
//!
//! See the documentation for the [`Semaphore`] type for details.
use crate::{
    loom::sync::atomic::{AtomicUsize, Ordering::*},
    scheduler::{FlagsError, Scheduler, ThreadFlags},
    WAIT_FOREVER,
};
use core::fmt;

/// A counting semaphore owned by a single waiting thread.
///
/// A `Semaphore` is the blocking primitive behind each waiter of a
/// [`MutexCondvar`]. It is *owned* by the thread that created it: only that
/// thread may [`acquire`] permits, but any thread may [`release`] them. This
/// lets the semaphore block its owner on the scheduler's
/// [`SEM_RELEASE`](ThreadFlags::SEM_RELEASE) thread flag, so that it needs no
/// wait list of its own.
///
/// # Spurious flags
///
/// The [`SEM_RELEASE`](ThreadFlags::SEM_RELEASE) flag is shared by every
/// semaphore a thread owns, and a release may set it after the owner stopped
/// waiting. Acquiring therefore treats the flag only as a hint that the permit
/// count *may* have changed, and re-checks the count after every wakeup.
///
/// [`MutexCondvar`]: crate::MutexCondvar
/// [`acquire`]: Semaphore::acquire
/// [`release`]: Semaphore::release
pub struct Semaphore<S: Scheduler> {
    permits: AtomicUsize,
    owner: S::Thread,
}

// === impl Semaphore ===

impl<S: Scheduler> Semaphore<S> {
    /// Returns a new semaphore with `permits` permits, owned by the calling
    /// thread.
    #[must_use]
    pub fn new(sched: &S, permits: usize) -> Self {
        Self {
            permits: AtomicUsize::new(permits),
            owner: sched.current(),
        }
    }

    /// Returns the number of permits currently available.
    #[inline]
    #[must_use]
    pub fn permits(&self) -> usize {
        self.permits.load(Acquire)
    }

    /// Returns a handle to the thread that owns this semaphore.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &S::Thread {
        &self.owner
    }

    /// Takes a permit, if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.load(Relaxed);
        loop {
            if permits == 0 {
                return false;
            }

            match self
                .permits
                .compare_exchange_weak(permits, permits - 1, AcqRel, Acquire)
            {
                Ok(_) => return true,
                Err(actual) => permits = actual,
            }
        }
    }

    /// Takes a permit, blocking the calling thread for up to `millis`
    /// milliseconds until one is available.
    ///
    /// If `millis` is [`WAIT_FOREVER`], this blocks until a permit is
    /// available. Returns `true` if a permit was acquired, or `false` if the
    /// timeout elapsed first.
    ///
    /// This must be called by the thread that created the semaphore.
    #[track_caller]
    pub fn acquire(&self, sched: &S, millis: u32) -> bool {
        let start = sched.now();
        let mut remaining = millis;
        loop {
            if test_dbg!(self.try_acquire()) {
                return true;
            }

            match sched.wait_flags(ThreadFlags::sem_release(), remaining) {
                Ok(_) => {
                    test_trace!(remaining, "Semaphore::acquire: woken");
                    if millis != WAIT_FOREVER {
                        // the clock only counts whole milliseconds, so the
                        // first wait always blocks for the full timeout.
                        let elapsed = sched.now().saturating_sub(start);
                        // never more than `millis`, so this fits in a `u32`.
                        remaining = u64::from(millis).saturating_sub(elapsed) as u32;
                        if remaining == 0 {
                            return self.try_acquire();
                        }
                    }
                }
                Err(FlagsError::Timeout) => {
                    assert_ne!(
                        millis, WAIT_FOREVER,
                        "a thread flag wait with no timeout timed out"
                    );
                    return self.try_acquire();
                }
                Err(FlagsError::Resource) => return self.try_acquire(),
            }
        }
    }

    /// Adds a permit, waking the owning thread if it is waiting for one.
    pub fn release(&self, sched: &S) {
        let _prev = self.permits.fetch_add(1, AcqRel);
        trace!(owner = ?self.owner, permits = _prev + 1, "Semaphore::release");
        if let Err(_error) = sched.set_flags(&self.owner, ThreadFlags::sem_release()) {
            debug!(owner = ?self.owner, error = %_error, "semaphore owner could not be woken");
        }
    }
}

impl<S: Scheduler> fmt::Debug for Semaphore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.permits.load(Relaxed))
            .field("owner", &self.owner)
            .finish()
    }
}
