use super::{ConditionVariable, TimedConditionVariable, WAIT_FOREVER};
use crate::{
    critical::{CriticalGuard, RawCriticalSection},
    loom::cell::UnsafeCell,
    scheduler::{FlagsError, Scheduler, ThreadFlags},
    util::{self, fmt, UnblockBatch},
};
use cordyceps::{
    list::{self, List},
    Linked,
};
use core::{
    cell::Cell,
    pin::pin,
    ptr::{self, NonNull},
};

/// A condition variable paired with a [critical section].
///
/// Because it is coordinated by a critical section rather than a mutex, a
/// `CriticalCondvar` may be notified from interrupt handlers as well as from
/// threads. Waiting still requires a thread: a waiting thread pushes a waiter
/// record from its stack onto the condition variable's wait list, exits the
/// critical section, and blocks on the scheduler's
/// [`UNBLOCK`](ThreadFlags::UNBLOCK) thread flag until a notifier sets it.
/// Waiters are notified in first-in, first-out order.
///
/// # Interrupt latency
///
/// [`notify_one`] and [`notify_all`] only unlink waiters while inside the
/// critical section. Setting the waiters' thread flags happens after the
/// critical section has been exited. [`notify_all`] moves every waiter to a
/// pending list in one pass, and then signals them in bounded batches, so
/// the time spent with interrupts masked does not grow with the number of
/// waiters.
///
/// # Timeouts
///
/// A waiter whose timeout elapses re-enters the critical section and then
/// checks whether a notifier has already claimed it. If one has, the wait
/// reports a notification. A notifier may therefore set the thread flag of a
/// thread that has already stopped waiting; the next wait on that thread
/// discards such a stale flag before blocking.
///
/// # Panics
///
/// Dropping a `CriticalCondvar` while threads are waiting on it panics.
///
/// [critical section]: crate::critical
/// [`notify_one`]: CriticalCondvar::notify_one
/// [`notify_all`]: CriticalCondvar::notify_all
pub struct CriticalCondvar<'cs, CS, S: Scheduler> {
    cs: &'cs CS,
    sched: S,
    queues: UnsafeCell<Queues<S>>,
}

struct Queues<S: Scheduler> {
    /// Threads waiting to be notified.
    waiting: List<Waiter<S>>,
    /// Threads claimed by `notify_all` that have not been signalled yet.
    pending: List<Waiter<S>>,
}

/// A thread waiting on a [`CriticalCondvar`].
struct Waiter<S: Scheduler> {
    links: list::Links<Waiter<S>>,
    /// Only accessed inside the critical section.
    state: Cell<WaitState>,
    thread: S::Thread,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum WaitState {
    /// In the `waiting` queue.
    Waiting,
    /// In the `pending` queue.
    Signaling,
    /// Claimed by a notifier and in neither queue.
    Notified,
}

// === impl CriticalCondvar ===

impl<'cs, CS, S> CriticalCondvar<'cs, CS, S>
where
    CS: RawCriticalSection,
    S: Scheduler,
{
    loom_const_fn! {
        /// Returns a new condition variable paired with the critical section
        /// `cs`, blocking waiters using `sched`.
        #[must_use]
        pub fn with_scheduler(cs: &'cs CS, sched: S) -> Self {
            Self {
                cs,
                sched,
                queues: UnsafeCell::new(Queues {
                    waiting: List::new(),
                    pending: List::new(),
                }),
            }
        }
    }

    /// Returns a new condition variable paired with the critical section
    /// `cs`.
    #[must_use]
    pub fn new(cs: &'cs CS) -> Self
    where
        S: Default,
    {
        Self::with_scheduler(cs, S::default())
    }

    /// Returns the critical section this condition variable is paired with.
    #[inline]
    #[must_use]
    pub fn critical_section(&self) -> &'cs CS {
        self.cs
    }

    /// Blocks the calling thread until it is notified.
    ///
    /// See [`ConditionVariable::wait`].
    #[track_caller]
    pub fn wait(&self, guard: &mut CriticalGuard<'_, CS>) {
        let _timed_out = self.wait_for(guard, WAIT_FOREVER);
        debug_assert!(!_timed_out, "a wait with no timeout timed out");
    }

    /// Blocks the calling thread until it is notified, or until `millis`
    /// milliseconds have elapsed.
    ///
    /// Returns `true` if the wait timed out. See
    /// [`ConditionVariable::wait_for`].
    ///
    /// # Panics
    ///
    /// If `guard` is not a guard for this condition variable's critical
    /// section. In debug builds, this also panics if the calling thread has
    /// entered the critical section more than once, since the wait could not
    /// exit it completely.
    #[track_caller]
    pub fn wait_for(&self, guard: &mut CriticalGuard<'_, CS>, millis: u32) -> bool {
        assert!(
            guard.is_for(self.cs),
            "a CriticalCondvar may only be waited on inside its own critical section"
        );
        debug_assert_eq!(
            self.cs.depth(),
            1,
            "a CriticalCondvar must be waited on inside its critical section exactly once"
        );

        // a notifier that claimed us during a previous wait may have set the
        // flag after that wait was over.
        if let Ok(_stale) = self.sched.wait_flags(ThreadFlags::unblock(), 0) {
            test_debug!(flags = ?_stale, "CriticalCondvar::wait_for: discarded stale flag");
        }

        let waiter = pin!(Waiter {
            links: list::Links::new(),
            state: Cell::new(WaitState::Waiting),
            thread: self.sched.current(),
        });
        let ptr = NonNull::from(&*waiter);
        enter_test_debug_span!("CriticalCondvar::wait_for", waiter = ?fmt::ptr(ptr), millis);

        self.with_queues(|queues| queues.waiting.push_back(ptr));
        let unlink = Unlink { cv: self, waiter: ptr };
        unsafe {
            // Safety: the guard proves that we are inside the critical
            // section, and we re-enter it before returning.
            self.cs.exit();
        }
        let result = test_dbg!(self.sched.wait_flags(ThreadFlags::unblock(), millis));
        self.cs.enter();

        let flagged = match result {
            Ok(_) => true,
            Err(FlagsError::Timeout) => {
                assert_ne!(
                    millis, WAIT_FOREVER,
                    "a thread flag wait with no timeout timed out"
                );
                false
            }
            Err(FlagsError::Resource) => {
                debug_assert_eq!(millis, 0, "only a zero timeout can find no flag");
                false
            }
        };

        let timed_out = match unlink.finish() {
            // a flag without a notifier is a stale flag from a wait that
            // ended after we checked; treat it as a spurious wakeup.
            WaitState::Waiting => !flagged,
            WaitState::Signaling | WaitState::Notified => false,
        };
        trace!(waiter = ?fmt::ptr(ptr), timed_out, flagged, "CriticalCondvar::wait_for: done");
        timed_out
    }

    /// Wakes the thread that has been waiting the longest, if any.
    ///
    /// This may be called from interrupt handlers, and from threads whether
    /// or not they are inside the critical section.
    pub fn notify_one(&self) {
        let thread = self.cs.with(|| {
            self.with_queues(|queues| {
                let waiter = queues.waiting.pop_front()?;
                trace!(waiter = ?fmt::ptr(waiter), "CriticalCondvar::notify_one");
                Some(Self::claim(waiter))
            })
        });

        if let Some(thread) = thread {
            util::unblock(&self.sched, &thread);
        }
    }

    /// Wakes every thread currently waiting.
    ///
    /// This may be called from interrupt handlers, and from threads whether
    /// or not they are inside the critical section.
    pub fn notify_all(&self) {
        let _claimed = self.cs.with(|| {
            self.with_queues(|Queues { waiting, pending }| {
                let mut claimed = 0;
                for waiter in waiting.drain() {
                    unsafe { waiter.as_ref() }
                        .state
                        .set(WaitState::Signaling);
                    pending.push_back(waiter);
                    claimed += 1;
                }
                claimed
            })
        });
        trace!(claimed = _claimed, "CriticalCondvar::notify_all");

        let mut batch = UnblockBatch::<S>::new();
        loop {
            let more = self.cs.with(|| {
                self.with_queues(|queues| {
                    while batch.can_add() {
                        match queues.pending.pop_front() {
                            Some(waiter) => {
                                batch.add(Self::claim(waiter));
                            }
                            None => return false,
                        }
                    }
                    !queues.pending.is_empty()
                })
            });

            batch.unblock_all(&self.sched);
            if !more {
                return;
            }
        }
    }

    /// Returns the current time on the scheduler's clock, in milliseconds.
    #[inline]
    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.sched.now()
    }

    /// Blocks until notified, or until [`current_time`](Self::current_time)
    /// reaches `deadline`.
    ///
    /// See [`TimedConditionVariable::wait_until`].
    #[track_caller]
    pub fn wait_until(&self, guard: &mut CriticalGuard<'_, CS>, deadline: u64) -> bool {
        let millis = super::timeout_until(self.current_time(), deadline);
        self.wait_for(guard, millis)
    }

    /// Marks a waiter that was just unlinked as notified, returning its
    /// thread.
    ///
    /// Must be called inside the critical section. Once it returns, the
    /// waiter may return from its wait as soon as the critical section is
    /// exited, so it must not be touched again.
    fn claim(waiter: NonNull<Waiter<S>>) -> S::Thread {
        let waiter = unsafe {
            // Safety: a waiter doesn't return from `wait_for` until it is
            // inside the critical section, and so are we.
            waiter.as_ref()
        };
        waiter.state.set(WaitState::Notified);
        waiter.thread.clone()
    }

    fn with_queues<U>(&self, f: impl FnOnce(&mut Queues<S>) -> U) -> U {
        debug_assert!(self.cs.is_active());
        self.queues.with_mut(|queues| unsafe {
            // Safety: every caller is inside the critical section.
            f(&mut *queues)
        })
    }
}

/// Takes a waiter out of whichever queue it is in if its wait unwinds.
///
/// The critical section is re-entered first if the waiter had exited it,
/// since the waiter's guard will exit it again.
struct Unlink<'a, 'cs, CS: RawCriticalSection, S: Scheduler> {
    cv: &'a CriticalCondvar<'cs, CS, S>,
    waiter: NonNull<Waiter<S>>,
}

impl<CS: RawCriticalSection, S: Scheduler> Unlink<'_, '_, CS, S> {
    /// Removes the waiter from its queue, returning the state it was in.
    ///
    /// Must be called inside the critical section.
    fn unlink(&self) -> WaitState {
        self.cv.with_queues(|queues| {
            let state = unsafe {
                // Safety: the waiter is pinned on the waiting thread's stack.
                self.waiter.as_ref()
            }
            .state
            .get();
            unsafe {
                // Safety: the state says which queue, if any, the waiter is
                // linked into.
                match state {
                    WaitState::Waiting => queues.waiting.remove(self.waiter),
                    WaitState::Signaling => queues.pending.remove(self.waiter),
                    WaitState::Notified => None,
                };
            }
            state
        })
    }

    fn finish(self) -> WaitState {
        let state = self.unlink();
        core::mem::forget(self);
        state
    }
}

impl<CS: RawCriticalSection, S: Scheduler> Drop for Unlink<'_, '_, CS, S> {
    fn drop(&mut self) {
        if !self.cv.cs.is_active() {
            self.cv.cs.enter();
        }
        let _state = self.unlink();
        debug!(
            waiter = ?fmt::ptr(self.waiter),
            state = ?_state,
            "CriticalCondvar::wait_for: unwound"
        );
    }
}

impl<CS, S: Scheduler> Drop for CriticalCondvar<'_, CS, S> {
    fn drop(&mut self) {
        let (waiting, pending) = self
            .queues
            .with(|queues| unsafe { ((*queues).waiting.len(), (*queues).pending.len()) });
        assert_eq!(
            waiting + pending,
            0,
            "a CriticalCondvar was dropped while threads were still waiting on it"
        );
    }
}

impl<'cs, CS, S> ConditionVariable for CriticalCondvar<'cs, CS, S>
where
    CS: RawCriticalSection,
    S: Scheduler,
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
        CriticalCondvar::wait_for(self, guard, millis)
    }

    #[inline]
    fn notify_one(&self) {
        CriticalCondvar::notify_one(self)
    }

    #[inline]
    fn notify_all(&self) {
        CriticalCondvar::notify_all(self)
    }
}

impl<'cs, CS, S> TimedConditionVariable for CriticalCondvar<'cs, CS, S>
where
    CS: RawCriticalSection,
    S: Scheduler,
{
    #[inline]
    fn current_time(&self) -> u64 {
        CriticalCondvar::current_time(self)
    }
}

impl<CS, S> fmt::Debug for CriticalCondvar<'_, CS, S>
where
    S: Scheduler + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalCondvar")
            .field("cs", &fmt::ptr(self.cs))
            .field("sched", &self.sched)
            .finish_non_exhaustive()
    }
}

// Safety: the queues are only accessed inside the critical section, and
// waiters are signalled through thread handles cloned out of it.
unsafe impl<CS, S> Send for CriticalCondvar<'_, CS, S>
where
    CS: Sync,
    S: Scheduler + Send + Sync,
    S::Thread: Send + Sync,
{
}

unsafe impl<CS, S> Sync for CriticalCondvar<'_, CS, S>
where
    CS: Sync,
    S: Scheduler + Send + Sync,
    S::Thread: Send + Sync,
{
}

// === impl Waiter ===

unsafe impl<S: Scheduler> Linked<list::Links<Self>> for Waiter<S> {
    type Handle = NonNull<Self>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        ptr
    }

    unsafe fn links(target: NonNull<Self>) -> NonNull<list::Links<Self>> {
        let links = ptr::addr_of_mut!((*target.as_ptr()).links);
        NonNull::new_unchecked(links)
    }
}
