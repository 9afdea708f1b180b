//! Low-power waiting for systems without a scheduler.
//!
//! When there is no scheduler to suspend a waiting thread, the only thing a
//! [`PollingCondvar`] waiter can do is idle the CPU until *something*
//! happens, then check whether it was notified. The [`WaitForEvent`] trait
//! abstracts over how the CPU idles. On Arm cores this is the `WFE`/`SEV`
//! instruction pair; [`Spin`] is a portable implementation which busy-waits
//! instead.
//!
//! [`PollingCondvar`]: crate::PollingCondvar
use crate::{
    loom::sync::atomic::{AtomicBool, Ordering::*},
    util::Backoff,
};

/// Idles until an event occurs.
///
/// Implementations behave like an *event register*: [`signal`] sets the
/// register, and [`wait_for_event`] returns immediately (clearing the
/// register) if it is set. Otherwise, [`wait_for_event`] idles until the
/// register is set, an interrupt occurs, or the timeout hint elapses.
///
/// [`wait_for_event`] is always allowed to return early; callers re-check
/// their condition and their deadline after every return.
///
/// [`signal`]: WaitForEvent::signal
/// [`wait_for_event`]: WaitForEvent::wait_for_event
pub trait WaitForEvent {
    /// Idles until the event register is set, or until an implementation
    /// defined event occurs.
    ///
    /// `timeout` is the number of milliseconds until the caller's deadline,
    /// or `None` if the caller has no deadline. Implementations which cannot
    /// arm a timer may ignore it, as long as they return periodically.
    fn wait_for_event(&self, timeout: Option<u32>);

    /// Sets the event register, waking any context idling in
    /// [`wait_for_event`](Self::wait_for_event).
    fn signal(&self);
}

impl<E: WaitForEvent + ?Sized> WaitForEvent for &E {
    #[inline]
    fn wait_for_event(&self, timeout: Option<u32>) {
        E::wait_for_event(self, timeout)
    }

    #[inline]
    fn signal(&self) {
        E::signal(self)
    }
}

/// A [`WaitForEvent`] implementation which spins.
///
/// Waiting spins with an exponential [`Backoff`] until the event is signalled
/// or the backoff saturates, whichever comes first.
#[derive(Debug, Default)]
pub struct Spin {
    pending: AtomicBool,
}

// === impl Spin ===

impl Spin {
    loom_const_fn! {
        /// Returns a new `Spin` with no pending event.
        #[must_use]
        pub fn new() -> Self {
            Self { pending: AtomicBool::new(false) }
        }
    }
}

impl WaitForEvent for Spin {
    fn wait_for_event(&self, _timeout: Option<u32>) {
        let mut boff = Backoff::new();
        while !self.pending.swap(false, AcqRel) {
            if boff.is_saturated() {
                return;
            }
            boff.spin();
        }
    }

    fn signal(&self) {
        self.pending.store(true, Release);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn signal_is_consumed() {
        let events = Spin::new();
        events.signal();
        assert!(events.pending.load(Acquire));

        events.wait_for_event(None);
        assert!(!events.pending.load(Acquire));
    }

    #[test]
    fn wait_returns_without_signal() {
        let events = Spin::new();
        // nothing will ever signal this; the wait must still return.
        events.wait_for_event(Some(1));
        events.wait_for_event(None);
    }
}
