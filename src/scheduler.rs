//! Integration with a thread scheduler.
//!
//! The [`MutexCondvar`] and [`CriticalCondvar`] condition variables suspend
//! the calling thread while it waits. They do this through the [`Scheduler`]
//! trait, which exposes the small set of thread-level operations that they
//! need: identifying the current thread, reading a millisecond clock, and
//! waiting on and setting per-thread event flags.
//!
//! Per-thread event flags are represented by the [`ThreadFlags`] bitfield. Two
//! of its bits are reserved by this crate, and the rest are free for
//! applications to use.
//!
//! [`MutexCondvar`]: crate::MutexCondvar
//! [`CriticalCondvar`]: crate::CriticalCondvar
use core::fmt;
use mycelium_bitfield::bitfield;

/// A thread scheduler.
///
/// # Thread identity
///
/// [`Scheduler::current_id`] must return a value that is unique to the
/// calling thread for as long as that thread exists, and must never return
/// `0`, which is used to represent "no thread".
///
/// # Thread flags
///
/// Each thread has a set of [`ThreadFlags`]. [`Scheduler::set_flags`] sets
/// flags on a thread, waking it if it is blocked waiting for any of them, and
/// [`Scheduler::wait_flags`] blocks the calling thread until any of the
/// requested flags are set, then clears *only* those of the requested flags
/// that were set. Flags that are set while nobody waits for them remain set
/// until they are waited for.
pub trait Scheduler {
    /// A handle to a thread that may be used to signal it from another
    /// context.
    type Thread: Clone + fmt::Debug;

    /// Returns a handle to the calling thread.
    fn current(&self) -> Self::Thread;

    /// Returns a non-zero identifier for the calling thread.
    fn current_id(&self) -> usize;

    /// Returns the current time, in milliseconds, from a monotonic clock.
    fn now(&self) -> u64;

    /// Waits until any of the flags in `flags` are set on the calling thread,
    /// or until `millis` milliseconds have elapsed.
    ///
    /// If `millis` is [`WAIT_FOREVER`](crate::WAIT_FOREVER), this never times
    /// out. If `millis` is 0, this checks the flags without blocking.
    ///
    /// On success, returns the subset of `flags` which were set, and clears
    /// them.
    ///
    /// # Errors
    ///
    /// - [`FlagsError::Timeout`] if `millis` elapsed with none of the flags
    ///   set.
    /// - [`FlagsError::Resource`] if `millis` was 0 and none of the flags were
    ///   set.
    fn wait_flags(&self, flags: ThreadFlags, millis: u32) -> Result<ThreadFlags, FlagsError>;

    /// Sets `flags` on `thread`, waking it if it was waiting for any of them.
    ///
    /// Returns the thread's flags after setting them.
    ///
    /// # Errors
    ///
    /// - [`FlagsError::Resource`] if the thread can no longer receive flags.
    fn set_flags(
        &self,
        thread: &Self::Thread,
        flags: ThreadFlags,
    ) -> Result<ThreadFlags, FlagsError>;
}

bitfield! {
    /// Event flags stored per thread.
    #[derive(Eq, PartialEq)]
    pub struct ThreadFlags<u32> {
        /// Flags available for application use.
        pub const USER = 29;

        /// Set on a thread when a [`Semaphore`] that it owns is released.
        ///
        /// [`Semaphore`]: crate::semaphore::Semaphore
        pub const SEM_RELEASE: bool;

        /// Set on a thread when a [`CriticalCondvar`] unblocks it.
        ///
        /// [`CriticalCondvar`]: crate::CriticalCondvar
        pub const UNBLOCK: bool;

        const _RESERVED = 1;
    }
}

/// Errors returned by [`Scheduler`] thread flag operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FlagsError {
    /// The wait timed out before any of the requested flags were set.
    #[error("timed out waiting for thread flags")]
    Timeout,
    /// The flags were not available, and the operation was not allowed to
    /// wait for them.
    #[error("thread flags were not available")]
    Resource,
}

// === impl ThreadFlags ===

impl ThreadFlags {
    /// Returns a set containing only the [`UNBLOCK`](Self::UNBLOCK) flag.
    #[must_use]
    pub fn unblock() -> Self {
        Self::new().with(Self::UNBLOCK, true)
    }

    /// Returns a set containing only the [`SEM_RELEASE`](Self::SEM_RELEASE)
    /// flag.
    #[must_use]
    pub fn sem_release() -> Self {
        Self::new().with(Self::SEM_RELEASE, true)
    }

    /// Returns `true` if any of the flags in `other` are also set in `self`.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the flags that are set in both `self` and `other`.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns `true` if no flags are set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}
