//! Condition variables.
//!
//! A condition variable lets one or more threads block until some condition
//! guarded by a lock becomes true, and lets another context wake one or all
//! of the blocked threads once it has made the condition true.
//!
//! This module provides three condition variables, all implementing the
//! [`ConditionVariable`] and [`TimedConditionVariable`] traits:
//!
//! - [`MutexCondvar`] is paired with a [`Mutex`], for coordinating threads.
//!   Each waiting thread blocks on its own [`Semaphore`].
//! - [`CriticalCondvar`] is paired with a [critical section] rather than a
//!   mutex, so that it may be notified from interrupt handlers. Waiting
//!   threads block on a [thread flag](crate::ThreadFlags::UNBLOCK) set by
//!   the notifier.
//! - [`PollingCondvar`] is also paired with a critical section, but requires
//!   no scheduler at all. Waiters idle the CPU until an [event] occurs, and
//!   re-check whether they were notified after every wakeup.
//!
//! # Usage
//!
//! Callers must hold the paired lock when they call any of the wait or notify
//! methods, and must re-check the condition they are waiting for in a loop
//! around [`wait`](ConditionVariable::wait), since every condition variable
//! in this module may wake spuriously.
//!
//! ```
//! # #[cfg(feature = "std")]
//! # fn main() {
//! use mycelium_condvar::{host::StdScheduler, Mutex, MutexCondvar};
//! use std::thread;
//!
//! let mutex = Mutex::<bool, StdScheduler>::new(false);
//! let cv = MutexCondvar::new(&mutex);
//!
//! thread::scope(|scope| {
//!     scope.spawn(|| {
//!         let mut ready = mutex.lock();
//!         *ready = true;
//!         cv.notify_one();
//!     });
//!
//!     let mut ready = mutex.lock();
//!     while !*ready {
//!         cv.wait(&mut ready);
//!     }
//! });
//! # }
//! # #[cfg(not(feature = "std"))]
//! # fn main() {}
//! ```
//!
//! [`Mutex`]: crate::Mutex
//! [`Semaphore`]: crate::semaphore::Semaphore
//! [critical section]: crate::critical
//! [event]: crate::event
mod critical;
mod mutex;
mod polling;

pub use self::critical::CriticalCondvar;
pub use self::mutex::MutexCondvar;
pub use self::polling::PollingCondvar;

/// A timeout value meaning "wait until notified, however long that takes".
pub const WAIT_FOREVER: u32 = u32::MAX;

/// A condition variable paired with a lock.
///
/// The lock is acquired with [`lock`](Self::lock), which returns a
/// [`Guard`](Self::Guard). The wait methods take the guard by mutable
/// reference: they release the lock while the calling thread is blocked, and
/// hold it again by the time they return.
pub trait ConditionVariable {
    /// The RAII guard which represents holding this condition variable's
    /// lock.
    type Guard<'a>
    where
        Self: 'a;

    /// Acquires the lock paired with this condition variable.
    fn lock(&self) -> Self::Guard<'_>;

    /// Blocks the calling thread until it is notified, or until `millis`
    /// milliseconds have elapsed.
    ///
    /// The lock held by `guard` is released while the thread is blocked and
    /// re-acquired before this method returns. If `millis` is
    /// [`WAIT_FOREVER`], this waits without a timeout.
    ///
    /// Returns `true` if the wait timed out, or `false` if the thread was
    /// notified. A `false` return may also be a spurious wakeup.
    ///
    /// # Panics
    ///
    /// If `guard` does not hold the lock paired with this condition variable.
    fn wait_for<'a>(&'a self, guard: &mut Self::Guard<'a>, millis: u32) -> bool;

    /// Blocks the calling thread until it is notified.
    ///
    /// This is equivalent to [`wait_for`](Self::wait_for) with a timeout of
    /// [`WAIT_FOREVER`]. The wakeup may be spurious.
    fn wait<'a>(&'a self, guard: &mut Self::Guard<'a>) {
        let _timed_out = self.wait_for(guard, WAIT_FOREVER);
        debug_assert!(!_timed_out, "a wait with no timeout timed out");
    }

    /// Wakes at most one thread waiting on this condition variable.
    ///
    /// If no threads are waiting, this does nothing.
    fn notify_one(&self);

    /// Wakes every thread currently waiting on this condition variable.
    ///
    /// If no threads are waiting, this does nothing.
    fn notify_all(&self);
}

/// A [`ConditionVariable`] with a monotonic millisecond clock, which may wait
/// until an absolute deadline.
pub trait TimedConditionVariable: ConditionVariable {
    /// Returns the current time, in milliseconds, on this condition variable's
    /// monotonic clock.
    fn current_time(&self) -> u64;

    /// Blocks the calling thread until it is notified, or until
    /// [`current_time`](Self::current_time) reaches `deadline`.
    ///
    /// If `deadline` has already passed, this checks for a notification
    /// without blocking. Deadlines further away than the longest finite
    /// timeout are clamped to it, rather than waiting forever.
    ///
    /// Returns `true` if the wait timed out, or `false` if the thread was
    /// notified.
    fn wait_until<'a>(&'a self, guard: &mut Self::Guard<'a>, deadline: u64) -> bool {
        let millis = timeout_until(self.current_time(), deadline);
        self.wait_for(guard, millis)
    }
}

/// Converts an absolute deadline into a finite relative timeout.
pub(crate) fn timeout_until(now: u64, deadline: u64) -> u32 {
    let millis = deadline.saturating_sub(now);
    // `WAIT_FOREVER` is reserved, so the longest finite wait is one less.
    u32::try_from(millis).map_or(WAIT_FOREVER - 1, |millis| millis.min(WAIT_FOREVER - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_in_the_past_polls() {
        assert_eq!(timeout_until(100, 50), 0);
        assert_eq!(timeout_until(100, 100), 0);
    }

    #[test]
    fn deadline_is_relative() {
        assert_eq!(timeout_until(100, 150), 50);
        assert_eq!(timeout_until(0, 1), 1);
    }

    #[test]
    fn far_deadlines_are_clamped() {
        assert_eq!(timeout_until(0, u64::from(WAIT_FOREVER)), WAIT_FOREVER - 1);
        assert_eq!(timeout_until(0, u64::MAX), WAIT_FOREVER - 1);
        assert_eq!(timeout_until(1, u64::from(WAIT_FOREVER)), WAIT_FOREVER - 1);
    }
}
