use super::{ConditionVariable, TimedConditionVariable, WAIT_FOREVER};
use crate::{
    blocking::{Mutex, MutexGuard, RawMutex},
    loom::cell::UnsafeCell,
    scheduler::Scheduler,
    semaphore::Semaphore,
    spin::Spinlock,
    util::fmt,
};
use cordyceps::{
    list::{self, List},
    Linked,
};
use core::{
    pin::pin,
    ptr::{self, NonNull},
};

/// A condition variable paired with a [`Mutex`].
///
/// Each thread that waits on a `MutexCondvar` pushes a waiter record, which
/// lives on its own stack, onto the condition variable's intrusive wait
/// list. The waiter owns a [`Semaphore`] with no permits; the thread releases
/// the mutex and blocks on that semaphore until a notifier takes the waiter
/// off the list and releases it. Waiters are notified in first-in, first-out
/// order.
///
/// Unlike [`std::sync::Condvar`], a `MutexCondvar` is bound to a single
/// [`Mutex`] when it is constructed, and every method which touches the wait
/// list, *including* [`notify_one`] and [`notify_all`], must be called while
/// holding that mutex.
///
/// # Timeouts
///
/// A waiter whose timeout elapses re-acquires the mutex and then checks
/// whether it is still on the wait list. If it is, nobody notified it, so it
/// removes itself and reports a timeout. If it is not, a notifier took it off
/// the list before the waiter got the mutex back, and the wait reports a
/// notification even though the semaphore wait timed out. Either way, every
/// notification is consumed by exactly one waiter.
///
/// # Panics
///
/// Dropping a `MutexCondvar` while threads are waiting on it panics.
///
/// [`notify_one`]: MutexCondvar::notify_one
/// [`notify_all`]: MutexCondvar::notify_all
/// [`std::sync::Condvar`]: https://doc.rust-lang.org/std/sync/struct.Condvar.html
pub struct MutexCondvar<'m, T, S: Scheduler, Lock: RawMutex = Spinlock> {
    mutex: &'m Mutex<T, S, Lock>,
    waiters: UnsafeCell<List<Waiter<S>>>,
}

/// A thread waiting on a [`MutexCondvar`].
///
/// This lives on the waiting thread's stack for the duration of the wait.
struct Waiter<S: Scheduler> {
    links: list::Links<Waiter<S>>,
    sem: Semaphore<S>,
}

// === impl MutexCondvar ===

impl<'m, T, S: Scheduler, Lock: RawMutex> MutexCondvar<'m, T, S, Lock> {
    loom_const_fn! {
        /// Returns a new condition variable paired with `mutex`, with no
        /// waiters.
        #[must_use]
        pub fn new(mutex: &'m Mutex<T, S, Lock>) -> Self {
            Self {
                mutex,
                waiters: UnsafeCell::new(List::new()),
            }
        }
    }

    /// Returns the [`Mutex`] this condition variable is paired with.
    #[inline]
    #[must_use]
    pub fn mutex(&self) -> &'m Mutex<T, S, Lock> {
        self.mutex
    }

    /// Blocks the calling thread until it is notified.
    ///
    /// See [`ConditionVariable::wait`].
    #[track_caller]
    pub fn wait(&self, guard: &mut MutexGuard<'_, T, S, Lock>) {
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
    /// If `guard` is not a guard for this condition variable's mutex.
    #[track_caller]
    pub fn wait_for(&self, guard: &mut MutexGuard<'_, T, S, Lock>, millis: u32) -> bool {
        assert!(
            ptr::eq(guard.mutex, self.mutex),
            "a MutexCondvar may only be waited on with a guard for its own Mutex"
        );
        debug_assert!(
            self.mutex.is_owned_by_current(),
            "a MutexCondvar must be waited on by the thread holding its Mutex"
        );

        let sched = self.mutex.scheduler();
        let waiter = pin!(Waiter {
            links: list::Links::new(),
            sem: Semaphore::new(sched, 0),
        });
        let ptr = NonNull::from(&*waiter);
        enter_test_debug_span!("MutexCondvar::wait_for", waiter = ?fmt::ptr(ptr), millis);

        self.with_waiters(|waiters| waiters.push_back(ptr));
        let unlink = Unlink { cv: self, waiter: ptr };
        unsafe {
            // Safety: the guard proves that we hold the mutex, and we don't
            // touch the guarded data until it is re-acquired below.
            self.mutex.release();
        }

        let _acquired = test_dbg!(waiter.sem.acquire(sched, millis));
        self.mutex.acquire();

        // if we're still on the list, nobody notified us.
        let timed_out = unlink.finish();
        debug_assert!(
            !(timed_out && _acquired),
            "a waiter on the list must not have been released"
        );
        trace!(waiter = ?fmt::ptr(ptr), timed_out, "MutexCondvar::wait_for: done");
        timed_out
    }

    /// Wakes the thread that has been waiting the longest, if any.
    ///
    /// # Panics
    ///
    /// If the calling thread does not hold this condition variable's mutex.
    #[track_caller]
    pub fn notify_one(&self) {
        self.assert_owned("notify_one");
        if let Some(waiter) = self.with_waiters(List::pop_front) {
            trace!(waiter = ?fmt::ptr(waiter), "MutexCondvar::notify_one");
            self.release(waiter);
        }
    }

    /// Wakes every thread currently waiting.
    ///
    /// # Panics
    ///
    /// If the calling thread does not hold this condition variable's mutex.
    #[track_caller]
    pub fn notify_all(&self) {
        self.assert_owned("notify_all");
        self.with_waiters(|waiters| {
            for waiter in waiters.drain() {
                trace!(waiter = ?fmt::ptr(waiter), "MutexCondvar::notify_all");
                self.release(waiter);
            }
        })
    }

    /// Returns the current time on the mutex's scheduler clock, in
    /// milliseconds.
    #[inline]
    #[must_use]
    pub fn current_time(&self) -> u64 {
        self.mutex.scheduler().now()
    }

    /// Blocks until notified, or until [`current_time`](Self::current_time)
    /// reaches `deadline`.
    ///
    /// See [`TimedConditionVariable::wait_until`].
    #[track_caller]
    pub fn wait_until(&self, guard: &mut MutexGuard<'_, T, S, Lock>, deadline: u64) -> bool {
        let millis = super::timeout_until(self.current_time(), deadline);
        self.wait_for(guard, millis)
    }

    #[track_caller]
    fn assert_owned(&self, _method: &str) {
        assert!(
            self.mutex.is_owned_by_current(),
            "MutexCondvar::{_method} may only be called by the thread holding the Mutex"
        );
    }

    fn release(&self, waiter: NonNull<Waiter<S>>) {
        unsafe {
            // Safety: a waiter doesn't return from `wait_for` until it has
            // re-acquired the mutex, and we are holding it.
            waiter.as_ref()
        }
        .sem
        .release(self.mutex.scheduler());
    }

    fn with_waiters<U>(&self, f: impl FnOnce(&mut List<Waiter<S>>) -> U) -> U {
        self.waiters.with_mut(|waiters| unsafe {
            // Safety: every caller holds the mutex.
            f(&mut *waiters)
        })
    }
}

/// Takes a waiter off the wait list if its wait unwinds.
///
/// The mutex is re-acquired first if the waiter had released it, since the
/// waiter's guard will release it again.
struct Unlink<'a, 'm, T, S: Scheduler, Lock: RawMutex> {
    cv: &'a MutexCondvar<'m, T, S, Lock>,
    waiter: NonNull<Waiter<S>>,
}

impl<T, S: Scheduler, Lock: RawMutex> Unlink<'_, '_, T, S, Lock> {
    /// Removes the waiter, returning `true` if it was still on the list.
    ///
    /// Must be called with the mutex held.
    fn unlink(&self) -> bool {
        self.cv
            .with_waiters(|waiters| unsafe {
                // Safety: the waiter is pinned on the waiting thread's stack,
                // so if it is linked, it is linked into this list.
                waiters.remove(self.waiter)
            })
            .is_some()
    }

    fn finish(self) -> bool {
        let linked = self.unlink();
        core::mem::forget(self);
        linked
    }
}

impl<T, S: Scheduler, Lock: RawMutex> Drop for Unlink<'_, '_, T, S, Lock> {
    fn drop(&mut self) {
        if !self.cv.mutex.is_owned_by_current() {
            self.cv.mutex.acquire();
        }
        let _linked = self.unlink();
        debug!(
            waiter = ?fmt::ptr(self.waiter),
            linked = _linked,
            "MutexCondvar::wait_for: unwound"
        );
    }
}

impl<T, S: Scheduler, Lock: RawMutex> Drop for MutexCondvar<'_, T, S, Lock> {
    fn drop(&mut self) {
        let waiters = self.waiters.with(|waiters| unsafe { (*waiters).len() });
        assert_eq!(
            waiters, 0,
            "a MutexCondvar was dropped while threads were still waiting on it"
        );
    }
}

impl<'m, T, S: Scheduler, Lock: RawMutex> ConditionVariable for MutexCondvar<'m, T, S, Lock> {
    type Guard<'a>
        = MutexGuard<'a, T, S, Lock>
    where
        Self: 'a;

    #[inline]
    fn lock(&self) -> Self::Guard<'_> {
        self.mutex.lock()
    }

    #[inline]
    fn wait_for<'a>(&'a self, guard: &mut Self::Guard<'a>, millis: u32) -> bool {
        MutexCondvar::wait_for(self, guard, millis)
    }

    #[inline]
    fn notify_one(&self) {
        MutexCondvar::notify_one(self)
    }

    #[inline]
    fn notify_all(&self) {
        MutexCondvar::notify_all(self)
    }
}

impl<'m, T, S: Scheduler, Lock: RawMutex> TimedConditionVariable for MutexCondvar<'m, T, S, Lock> {
    #[inline]
    fn current_time(&self) -> u64 {
        MutexCondvar::current_time(self)
    }
}

impl<T, S, Lock> fmt::Debug for MutexCondvar<'_, T, S, Lock>
where
    S: Scheduler,
    Lock: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexCondvar")
            .field("mutex", &fmt::ptr(self.mutex))
            .field("locked", &self.mutex.is_locked())
            .finish_non_exhaustive()
    }
}

// Safety: the wait list is only accessed while holding the mutex, and
// waiters are released from other threads through their semaphores.
unsafe impl<T, S, Lock> Send for MutexCondvar<'_, T, S, Lock>
where
    Mutex<T, S, Lock>: Sync,
    S: Scheduler,
    S::Thread: Send + Sync,
    Lock: RawMutex,
{
}

unsafe impl<T, S, Lock> Sync for MutexCondvar<'_, T, S, Lock>
where
    Mutex<T, S, Lock>: Sync,
    S: Scheduler,
    S::Thread: Send + Sync,
    Lock: RawMutex,
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
        // Safety: using `ptr::addr_of_mut!` avoids creating a temporary
        // reference, and the pointer is non-null because `target` is.
        let links = ptr::addr_of_mut!((*target.as_ptr()).links);
        NonNull::new_unchecked(links)
    }
}
