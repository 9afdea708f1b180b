//! Blocking readiness polling.
//!
//! See the documentation for the [`PollWaker`] type for details.
use crate::{
    condvar::TimedConditionVariable,
    loom::sync::atomic::{AtomicUsize, Ordering::*},
};
use core::fmt;

/// A "something may have become ready" signal for blocking poll loops.
///
/// A `PollWaker` wraps a [`TimedConditionVariable`], and is shared between
/// code which polls a set of event sources for readiness (such as device
/// drivers' receive buffers) and the event sources themselves. A poller calls
/// [`poll`] with a function that scans every source it is interested in. If
/// nothing is ready, the poller blocks on the condition variable until an
/// event source calls [`wake`], and then scans again.
///
/// There is no need for one `PollWaker` per event source: a single
/// `PollWaker` may be shared by every source in the system, at the cost of
/// spurious wakeups for pollers that are not interested in the source which
/// woke them. Unlike a global, the `PollWaker` must be passed by reference to
/// each poller and event source that uses it.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "std")]
/// # fn main() {
/// use mycelium_condvar::{
///     host::{HostCriticalSection, StdScheduler},
///     CriticalCondvar, PollWaker,
/// };
/// use std::{sync::atomic::{AtomicBool, Ordering}, thread};
///
/// let cs = HostCriticalSection::new();
/// let waker = PollWaker::new(CriticalCondvar::<_, StdScheduler>::new(&cs));
/// let ready = AtomicBool::new(false);
///
/// thread::scope(|scope| {
///     scope.spawn(|| {
///         // an event source became ready...
///         ready.store(true, Ordering::Release);
///         waker.wake();
///     });
///
///     // wait for the event source, with no timeout.
///     let count = waker.poll(None, |_| ready.load(Ordering::Acquire) as usize);
///     assert_eq!(count, 1);
/// });
/// # }
/// # #[cfg(not(feature = "std"))]
/// # fn main() {}
/// ```
///
/// [`poll`]: PollWaker::poll
/// [`wake`]: PollWaker::wake
pub struct PollWaker<CV> {
    cv: CV,
    waits: AtomicUsize,
    wakes: AtomicUsize,
}

impl<CV> PollWaker<CV> {
    loom_const_fn! {
        /// Returns a new `PollWaker` which blocks pollers using the
        /// condition variable `cv`.
        #[must_use]
        pub fn new(cv: CV) -> Self {
            Self {
                cv,
                waits: AtomicUsize::new(0),
                wakes: AtomicUsize::new(0),
            }
        }
    }

    /// Returns the condition variable pollers block on.
    #[inline]
    #[must_use]
    pub fn condvar(&self) -> &CV {
        &self.cv
    }

    /// Returns the number of times a poller has blocked.
    #[inline]
    #[must_use]
    pub fn wait_count(&self) -> usize {
        self.waits.load(Relaxed)
    }

    /// Returns the number of times [`wake`](Self::wake) has been called.
    #[inline]
    #[must_use]
    pub fn wake_count(&self) -> usize {
        self.wakes.load(Relaxed)
    }
}

impl<CV: TimedConditionVariable> PollWaker<CV> {
    /// Wakes every poller blocked in [`poll`](Self::poll), so that they scan
    /// their event sources again.
    pub fn wake(&self) {
        let _lock = self.cv.lock();
        self.cv.notify_all();
        let _wakes = self.wakes.fetch_add(1, Relaxed);
        trace!(wakes = _wakes + 1, "PollWaker::wake");
    }

    /// Scans for ready event sources, blocking until at least one is ready
    /// or `timeout` milliseconds have elapsed.
    ///
    /// `scan` is called with the condition variable's lock held, and returns
    /// the number of ready event sources. Its argument is `true` if the
    /// poller will block should nothing be ready, in which case event sources
    /// should arrange to call [`wake`](Self::wake) when they become ready.
    ///
    /// If `timeout` is `None`, this blocks until `scan` returns a nonzero
    /// count. If it is `Some(0)`, this scans once and never blocks. After a
    /// finite timeout elapses, the event sources are scanned one final time.
    ///
    /// Returns the result of the last scan.
    pub fn poll(&self, timeout: Option<u32>, mut scan: impl FnMut(bool) -> usize) -> usize {
        let deadline = match timeout {
            Some(0) | None => None,
            Some(millis) => Some(
                self.cv
                    .current_time()
                    .saturating_add(u64::from(millis)),
            ),
        };
        let mut blocking = timeout != Some(0);

        let mut guard = self.cv.lock();
        loop {
            let count = test_dbg!(scan(blocking));
            if count > 0 || !blocking {
                return count;
            }

            self.waits.fetch_add(1, Relaxed);
            let timed_out = match deadline {
                Some(deadline) => self.cv.wait_until(&mut guard, deadline),
                None => {
                    self.cv.wait(&mut guard);
                    false
                }
            };

            if timed_out {
                test_trace!("PollWaker::poll: timed out; scanning one last time");
                blocking = false;
            }
        }
    }
}

impl<CV: fmt::Debug> fmt::Debug for PollWaker<CV> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollWaker")
            .field("cv", &self.cv)
            .field("waits", &self.wait_count())
            .field("wakes", &self.wake_count())
            .finish()
    }
}
