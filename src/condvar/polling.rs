use super::{ConditionVariable, TimedConditionVariable, WAIT_FOREVER};
use crate::{
    critical::{CriticalGuard, RawCriticalSection},
    event::{Spin, WaitForEvent},
    loom::sync::atomic::{AtomicU32, Ordering::*},
    time::Clock,
    util::fmt,
};

/// A condition variable for systems without a scheduler.
///
/// A `PollingCondvar` is paired with a [critical section], like a
/// [`CriticalCondvar`], but it never suspends a thread. Instead, waiters
/// exit the critical section and idle the CPU using a [`WaitForEvent`]
/// implementation, then re-enter it and check whether they were notified,
/// until they are notified or their deadline passes. Deadlines are measured
/// using a [`Clock`].
///
/// # Notification semantics
///
/// Waiters are not tracked individually. A `PollingCondvar` holds a single
/// notification counter, which every notification increments; a waiter is
/// considered notified if the counter changed since its wait began. This
/// means that [`notify_one`] wakes *every* current waiter, exactly like
/// [`notify_all`] does. Since spurious wakeups are always permitted, this is
/// still a correct condition variable, but callers should not rely on
/// `notify_one` waking only one thread.
///
/// [critical section]: crate::critical
/// [`CriticalCondvar`]: crate::CriticalCondvar
/// [`notify_one`]: PollingCondvar::notify_one
/// [`notify_all`]: PollingCondvar::notify_all
pub struct PollingCondvar<'cs, CS, E = Spin> {
    cs: &'cs CS,
    events: E,
    clock: Clock,
    notifications: AtomicU32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum PollState {
    Waiting,
    TimedOut,
    Notified,
}

// === impl PollingCondvar ===

impl<'cs, CS, E> PollingCondvar<'cs, CS, E>
where
    CS: RawCriticalSection,
    E: WaitForEvent,
{
    /// Returns a new condition variable paired with the critical section
    /// `cs`, which idles using `events` and measures timeouts using `clock`.
    #[must_use]
    pub fn new(cs: &'cs CS, events: E, clock: Clock) -> Self {
        Self {
            cs,
            events,
            clock,
            notifications: AtomicU32::new(0),
        }
    }

    /// Returns the critical section this condition variable is paired with.
    #[inline]
    #[must_use]
    pub fn critical_section(&self) -> &'cs CS {
        self.cs
    }

    /// Returns the [`Clock`] this condition variable measures timeouts with.
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Blocks the calling thread until it is notified.
    ///
    /// See [`ConditionVariable::wait`].
    #[track_caller]
    pub fn wait(&self, guard: &mut CriticalGuard<'_, CS>) {
        let _timed_out = self.wait_for(guard, WAIT_FOREVER);
        debug_assert!(!_timed_out, "a wait with no timeout timed out");
    }

    /// Idles until notified, or until `millis` milliseconds have elapsed.
    ///
    /// Returns `true` if the wait timed out. With a timeout of 0, this exits
    /// the critical section once, to let pending interrupts run, and then
    /// reports whether a notification arrived in the meantime.
    ///
    /// # Panics
    ///
    /// If `guard` is not a guard for this condition variable's critical
    /// section. In debug builds, this also panics if the calling thread has
    /// entered the critical section more than once.
    #[track_caller]
    pub fn wait_for(&self, guard: &mut CriticalGuard<'_, CS>, millis: u32) -> bool {
        assert!(
            guard.is_for(self.cs),
            "a PollingCondvar may only be waited on inside its own critical section"
        );
        debug_assert_eq!(
            self.cs.depth(),
            1,
            "a PollingCondvar must be waited on inside its critical section exactly once"
        );

        let epoch = self.notifications.load(Relaxed);
        let deadline = match millis {
            WAIT_FOREVER => None,
            millis => Some(self.clock.now_ms().saturating_add(u64::from(millis))),
        };
        enter_test_debug_span!("PollingCondvar::wait_for", epoch, ?deadline);

        let mut state = PollState::Waiting;
        loop {
            match state {
                PollState::Waiting => {}
                PollState::TimedOut => return true,
                PollState::Notified => return false,
            }

            unsafe {
                // Safety: the guard proves that we are inside the critical
                // section, and we re-enter it right after idling.
                self.cs.exit();
            }
            if millis != 0 {
                let timeout = deadline.map(|deadline| {
                    super::timeout_until(self.clock.now_ms(), deadline)
                });
                self.events.wait_for_event(timeout);
            }
            self.cs.enter();

            state = if self.notifications.load(Relaxed) != epoch {
                PollState::Notified
            } else if deadline.is_some_and(|deadline| self.clock.now_ms() >= deadline) {
                PollState::TimedOut
            } else {
                PollState::Waiting
            };
            test_trace!(?state, "PollingCondvar::wait_for");
        }
    }

    /// Wakes every current waiter.
    ///
    /// A `PollingCondvar` does not track individual waiters, so this is the
    /// same as [`notify_all`](Self::notify_all).
    #[inline]
    pub fn notify_one(&self) {
        self.notify_all()
    }

    /// Wakes every current waiter.
    ///
    /// This may be called from interrupt handlers, and from threads whether
    /// or not they are inside the critical section.
    pub fn notify_all(&self) {
        let _epoch = self
            .cs
            .with(|| self.notifications.fetch_add(1, Relaxed).wrapping_add(1));
        trace!(epoch = _epoch, "PollingCondvar::notify");
        self.events.signal();
    }

    /// Returns the current time on this condition variable's clock, in
    /// milliseconds.
    #[inline]
    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Idles until notified, or until [`current_time`](Self::current_time)
    /// reaches `deadline`.
    ///
    /// See [`TimedConditionVariable::wait_until`].
    #[track_caller]
    pub fn wait_until(&self, guard: &mut CriticalGuard<'_, CS>, deadline: u64) -> bool {
        let millis = super::timeout_until(self.current_time(), deadline);
        self.wait_for(guard, millis)
    }
}

impl<'cs, CS, E> ConditionVariable for PollingCondvar<'cs, CS, E>
where
    CS: RawCriticalSection,
    E: WaitForEvent,
{
    type Guard<'a>
        = CriticalGuard<'a, CS>
    where
        Self: 'a;

    #[inline]
    fn lock(&self) -> Self::Guard<'_> {
        self.cs.guard()
    }

    #[inline]
    fn wait_for<'a>(&'a self, guard: &mut Self::Guard<'a>, millis: u32) -> bool {
        PollingCondvar::wait_for(self, guard, millis)
    }

    #[inline]
    fn notify_one(&self) {
        PollingCondvar::notify_one(self)
    }

    #[inline]
    fn notify_all(&self) {
        PollingCondvar::notify_all(self)
    }
}

impl<'cs, CS, E> TimedConditionVariable for PollingCondvar<'cs, CS, E>
where
    CS: RawCriticalSection,
    E: WaitForEvent,
{
    #[inline]
    fn current_time(&self) -> u64 {
        PollingCondvar::current_time(self)
    }
}

impl<CS, E: fmt::Debug> fmt::Debug for PollingCondvar<'_, CS, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingCondvar")
            .field("cs", &fmt::ptr(self.cs))
            .field("events", &self.events)
            .field("clock", &self.clock)
            .field("notifications", &self.notifications.load(Relaxed))
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::{
        host::{HostCriticalSection, HostEvents},
        loom::{self, thread},
        util::test::assert_send_sync,
    };
    use std::{
        sync::atomic::AtomicBool,
        time::{Duration, Instant},
    };

    type TestCondvar<'cs> = PollingCondvar<'cs, HostCriticalSection, HostEvents>;

    fn condvar(cs: &HostCriticalSection) -> TestCondvar<'_> {
        PollingCondvar::new(cs, HostEvents::new(), Clock::host())
    }

    #[test]
    fn polling_condvar_is_send_and_sync() {
        assert_send_sync::<TestCondvar<'static>>();
    }

    #[test]
    fn zero_timeout_times_out_immediately() {
        loom::model(|| {
            let cs = HostCriticalSection::new();
            let cv = condvar(&cs);
            let mut guard = cs.guard();

            let start = Instant::now();
            assert!(cv.wait_for(&mut guard, 0));
            assert!(start.elapsed() < Duration::from_millis(50));
            assert_eq!(cs.depth(), 1);
        });
    }

    #[test]
    fn times_out_after_deadline() {
        loom::model(|| {
            let cs = HostCriticalSection::new();
            let cv = condvar(&cs);
            let mut guard = cs.guard();

            let start = Instant::now();
            assert!(cv.wait_for(&mut guard, 50));
            assert!(start.elapsed() >= Duration::from_millis(50));
        });
    }

    #[test]
    fn deadline_in_the_past() {
        loom::model(|| {
            let cs = HostCriticalSection::new();
            let cv = condvar(&cs);
            let mut guard = cs.guard();
            let past = cv.current_time().saturating_sub(10);
            assert!(ConditionVariable::wait_for(&cv, &mut guard, 0));
            assert!(TimedConditionVariable::wait_until(&cv, &mut guard, past));
        });
    }

    #[test]
    fn notification_between_polls() {
        loom::model(|| {
            let cs = HostCriticalSection::new();
            let cv = condvar(&cs);
            let mut guard = cs.guard();

            // an "interrupt" that fires while the waiter is idling.
            thread::scope(|scope| {
                thread::spawn(scope, || {
                    thread::sleep(Duration::from_millis(10));
                    cv.notify_one();
                });
                assert!(!cv.wait_for(&mut guard, WAIT_FOREVER));
            });
        });
    }

    #[test]
    fn notify_one_wakes_every_waiter() {
        loom::model(|| {
            let cs = HostCriticalSection::new();
            let cv = condvar(&cs);
            let done = AtomicBool::new(false);

            thread::scope(|scope| {
                for _ in 0..3 {
                    thread::spawn(scope, || {
                        let mut guard = cs.guard();
                        while !done.load(Acquire) {
                            // bounded, so that a waiter which started after
                            // the notification still finishes.
                            let _ = cv.wait_for(&mut guard, 20);
                        }
                    });
                }

                thread::sleep(Duration::from_millis(5));
                done.store(true, Release);
                cv.notify_one();
            });
        });
    }

    #[test]
    #[should_panic(expected = "inside its own critical section")]
    fn wait_with_foreign_guard() {
        let cs = HostCriticalSection::new();
        let other = HostCriticalSection::new();
        let cv = condvar(&cs);
        let mut guard = other.guard();
        cv.wait_for(&mut guard, 0);
    }
}
