//! Synchronous (blocking) mutual exclusion.
//!
//! This module provides [`Mutex`], the lock that a [`MutexCondvar`] is paired
//! with, and the [`RawMutex`] trait abstracting over the raw lock underneath
//! it.
//!
//! Unlike a plain spinlock, a [`Mutex`] records which thread currently owns
//! it. This allows it to detect a thread attempting to lock a mutex it
//! already holds (which would otherwise deadlock), and allows condition
//! variables to assert that they are only notified by the thread holding
//! their mutex.
//!
//! [`MutexCondvar`]: crate::MutexCondvar
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicUsize, Ordering::*},
    },
    scheduler::Scheduler,
    spin::Spinlock,
    util::fmt,
};
use core::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// Trait abstracting over raw mutual exclusion locks.
///
/// # Safety
///
/// Implementations of this trait must ensure that the mutex is actually
/// exclusive: a lock can't be acquired while the mutex is already locked.
pub unsafe trait RawMutex {
    /// Acquires this mutex, blocking the current thread/CPU core until it is
    /// able to do so.
    fn lock(&self);

    /// Attempts to acquire this mutex without blocking. Returns `true`
    /// if the lock was successfully acquired and `false` otherwise.
    fn try_lock(&self) -> bool;

    /// Unlocks this mutex.
    ///
    /// # Safety
    ///
    /// This method may only be called if the mutex is held in the current
    /// context, i.e. it must be paired with a successful call to [`lock`] or
    /// [`try_lock`].
    ///
    /// [`lock`]: RawMutex::lock
    /// [`try_lock`]: RawMutex::try_lock
    unsafe fn unlock(&self);

    /// Returns `true` if the mutex is currently locked.
    fn is_locked(&self) -> bool;
}

/// A blocking mutual exclusion lock which tracks its owning thread.
///
/// The data can only be accessed through the RAII guards returned from
/// [`lock`] and [`try_lock`], which guarantees that the data is only ever
/// accessed when the mutex is locked.
///
/// The `S` type parameter is the [`Scheduler`] used to identify the current
/// thread. The `Lock` type parameter is the [`RawMutex`] that provides mutual
/// exclusion, a [`Spinlock`] by default.
///
/// # Recursive locking
///
/// A `Mutex` is not recursive. Calling [`lock`] on a mutex that the calling
/// thread already holds will panic, rather than deadlocking.
///
/// # Fairness
///
/// This is *not* a fair mutex.
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
pub struct Mutex<T, S, Lock = Spinlock> {
    lock: Lock,
    owner: AtomicUsize,
    sched: S,
    data: UnsafeCell<T>,
}

/// An RAII implementation of a "scoped lock" of a [`Mutex`]. When this
/// structure is dropped (falls out of scope), the lock will be unlocked.
///
/// Since the mutex records which thread owns it, a `MutexGuard` cannot be
/// sent to another thread.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
#[must_use = "if unused, the `Mutex` will immediately unlock"]
pub struct MutexGuard<'a, T, S: Scheduler, Lock: RawMutex = Spinlock> {
    pub(crate) mutex: &'a Mutex<T, S, Lock>,
    _not_send: PhantomData<*mut ()>,
}

const UNOWNED: usize = 0;

// === impl Mutex ===

impl<T, S> Mutex<T, S> {
    loom_const_fn! {
        /// Returns a new `Mutex` protecting the provided `data`, using `sched`
        /// to identify the owning thread.
        ///
        /// The returned `Mutex` is in an unlocked state, ready for use.
        #[must_use]
        pub fn with_scheduler(data: T, sched: S) -> Self {
            Self {
                lock: Spinlock::new(),
                owner: AtomicUsize::new(UNOWNED),
                sched,
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Returns a new `Mutex` protecting the provided `data`.
    ///
    /// The returned `Mutex` is in an unlocked state, ready for use.
    #[must_use]
    pub fn new(data: T) -> Self
    where
        S: Default,
    {
        Self::with_scheduler(data, S::default())
    }
}

impl<T, S, Lock> Mutex<T, S, Lock> {
    loom_const_fn! {
        /// Returns a new `Mutex` protecting the provided `data`, using the
        /// provided [`RawMutex`] rather than a [`Spinlock`].
        ///
        /// The returned `Mutex` is in an unlocked state, ready for use.
        #[must_use]
        pub fn with_raw_mutex(data: T, sched: S, lock: Lock) -> Self {
            Self {
                lock,
                owner: AtomicUsize::new(UNOWNED),
                sched,
                data: UnsafeCell::new(data),
            }
        }
    }

    /// Returns the [`Scheduler`] this mutex identifies threads with.
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &S {
        &self.sched
    }

    /// Consumes this `Mutex`, returning the guarded data.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs to
    /// take place -- the mutable borrow statically guarantees no locks exist.
    pub fn get_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: since this call borrows the `Mutex` mutably, no actual
            // locking needs to take place -- the mutable borrow statically
            // guarantees no locks exist.
            self.data.with_mut(|data| &mut *data)
        }
    }
}

impl<T, S, Lock> Mutex<T, S, Lock>
where
    S: Scheduler,
    Lock: RawMutex,
{
    fn guard(&self) -> MutexGuard<'_, T, S, Lock> {
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock without blocking.
    ///
    /// If the lock could not be acquired at this time (including if it is
    /// held by the calling thread), then [`None`] is returned. Otherwise, an
    /// RAII guard is returned. The lock will be unlocked when the guard is
    /// dropped.
    #[must_use]
    #[cfg_attr(test, track_caller)]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, S, Lock>> {
        if !self.lock.try_lock() {
            return None;
        }
        self.owner.store(self.sched.current_id(), Relaxed);
        Some(self.guard())
    }

    /// Acquires this mutex, blocking until it is locked.
    ///
    /// Upon returning, the calling thread is the only thread with the lock
    /// held. An RAII guard is returned to allow scoped unlock of the lock.
    /// When the guard goes out of scope, the mutex will be unlocked.
    ///
    /// # Panics
    ///
    /// If the calling thread already holds this mutex.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T, S, Lock> {
        self.acquire();
        self.guard()
    }

    /// Returns `true` if the mutex is currently locked by any thread.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Returns `true` if the mutex is currently locked by the calling thread.
    #[inline]
    #[must_use]
    pub fn is_owned_by_current(&self) -> bool {
        self.owner.load(Relaxed) == self.sched.current_id()
    }

    /// Locks the raw mutex and records the calling thread as its owner.
    #[track_caller]
    pub(crate) fn acquire(&self) {
        let me = self.sched.current_id();
        debug_assert_ne!(me, UNOWNED, "scheduler returned a reserved thread ID");
        assert_ne!(
            self.owner.load(Relaxed),
            me,
            "a Mutex may not be locked recursively: it is already held by the \
             calling thread"
        );
        self.lock.lock();
        self.owner.store(me, Relaxed);
    }

    /// Releases the mutex without a guard.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the mutex, and must not access the data
    /// through an outstanding guard until it calls [`acquire`](Self::acquire)
    /// again.
    pub(crate) unsafe fn release(&self) {
        debug_assert!(
            self.is_owned_by_current(),
            "a Mutex may only be unlocked by the thread that owns it"
        );
        self.owner.store(UNOWNED, Relaxed);
        self.lock.unlock();
    }
}

impl<T: Default, S: Default, Lock: Default> Default for Mutex<T, S, Lock> {
    fn default() -> Self {
        Self::with_raw_mutex(T::default(), S::default(), Lock::default())
    }
}

impl<T, S, Lock> fmt::Debug for Mutex<T, S, Lock>
where
    T: fmt::Debug,
    S: Scheduler,
    Lock: fmt::Debug + RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("data", &fmt::opt(&self.try_lock()).or_else("<locked>"))
            .field("owner", &self.owner.load(Relaxed))
            .field("lock", &self.lock)
            .finish()
    }
}

unsafe impl<T: Send, S: Send, Lock: Send> Send for Mutex<T, S, Lock> {}
unsafe impl<T: Send, S: Sync, Lock: Sync> Sync for Mutex<T, S, Lock> {}

// === impl MutexGuard ===

impl<T, S: Scheduler, Lock: RawMutex> Deref for MutexGuard<'_, T, S, Lock> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.mutex.data.with(|data| unsafe {
            // Safety: we are holding the lock, so it is okay to dereference the
            // pointer.
            &*data
        })
    }
}

impl<T, S: Scheduler, Lock: RawMutex> DerefMut for MutexGuard<'_, T, S, Lock> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.mutex.data.with_mut(|data| unsafe {
            // Safety: we are holding the lock, and the guard is borrowed
            // mutably, so this is the only reference to the data.
            &mut *data
        })
    }
}

impl<T, S: Scheduler, Lock: RawMutex> Drop for MutexGuard<'_, T, S, Lock> {
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        unsafe { self.mutex.release() }
    }
}

impl<T, S, Lock> fmt::Debug for MutexGuard<'_, T, S, Lock>
where
    T: fmt::Debug,
    S: Scheduler,
    Lock: RawMutex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

unsafe impl<T: Sync, S: Scheduler + Sync, Lock: RawMutex + Sync> Sync
    for MutexGuard<'_, T, S, Lock>
{
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::{
        host::StdScheduler,
        loom::{self, thread},
        util::test::assert_send_sync,
    };

    type TestMutex<T> = Mutex<T, StdScheduler>;

    #[test]
    fn mutex_is_send_and_sync() {
        assert_send_sync::<TestMutex<usize>>();
    }

    #[test]
    fn multithreaded() {
        loom::model(|| {
            let mutex = TestMutex::new(String::new());

            thread::scope(|scope| {
                let t1 = thread::spawn(scope, || {
                    let mut lock = mutex.lock();
                    lock.push_str("aaaaa");
                });

                {
                    let mut lock = mutex.lock();
                    lock.push_str("bbbbb");
                }
                t1.join().unwrap();
            });

            let data = mutex.into_inner();
            assert_eq!(data.len(), 10);
        });
    }

    #[test]
    fn try_lock() {
        loom::model(|| {
            let mutex = TestMutex::new(42);
            // First lock succeeds
            let a = mutex.try_lock();
            assert_eq!(a.as_ref().map(|r| **r), Some(42));

            // Additional lock fails, even on the owning thread
            let b = mutex.try_lock();
            assert!(b.is_none());

            // After dropping lock, it succeeds again
            drop(a);
            let c = mutex.try_lock();
            assert_eq!(c.as_ref().map(|r| **r), Some(42));
        });
    }

    #[test]
    fn tracks_owner() {
        loom::model(|| {
            let mutex = TestMutex::new(());
            assert!(!mutex.is_owned_by_current());
            assert!(!mutex.is_locked());

            let guard = mutex.lock();
            assert!(mutex.is_owned_by_current());
            assert!(mutex.is_locked());

            thread::scope(|scope| {
                thread::spawn(scope, || {
                    assert!(!mutex.is_owned_by_current());
                    assert!(mutex.is_locked());
                })
                .join()
                .unwrap();
            });

            drop(guard);
            assert!(!mutex.is_owned_by_current());
        });
    }

    #[test]
    #[should_panic = "may not be locked recursively"]
    fn recursive_lock_panics() {
        let mutex = TestMutex::new(());
        let _a = mutex.lock();
        let _b = mutex.lock();
    }

    #[test]
    fn get_mut() {
        let mut mutex = TestMutex::new(0);
        *mutex.get_mut() = 10;
        assert_eq!(*mutex.lock(), 10);
    }
}
