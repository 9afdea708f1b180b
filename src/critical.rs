//! Critical sections.
//!
//! A critical section is a region of code which cannot be preempted by
//! interrupt handlers (or, on a hosted system, by other threads). The
//! [`CriticalCondvar`] and [`PollingCondvar`] condition variables are paired
//! with a critical section rather than a mutex, so that they may be notified
//! from interrupt handlers.
//!
//! Critical sections in this module are *nestable*: entering a critical
//! section that is already active on the current core or thread increments a
//! nesting depth, and only exiting the outermost level actually ends the
//! critical section. Condition variables use [`RawCriticalSection::depth`] to
//! check that a waiter holds the critical section exactly once, since the
//! waiter must exit it completely in order to block.
//!
//! This module provides:
//!
//! - [`RawCriticalSection`]: the trait implemented by critical sections.
//! - [`CriticalGuard`]: an RAII guard which exits a critical section when
//!   dropped.
//! - [`MaskInterrupts`]: a critical section for single-core systems, which
//!   masks interrupts through an [`Interrupts`] controller.
//! - [`SpinCriticalSection`]: a critical section for hosted systems, in which
//!   other threads play the role of interrupt handlers and are excluded by a
//!   spinlock.
//!
//! [`CriticalCondvar`]: crate::CriticalCondvar
//! [`PollingCondvar`]: crate::PollingCondvar
use crate::{
    blocking::RawMutex,
    loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering::*},
    scheduler::Scheduler,
    spin::Spinlock,
};
use core::{fmt, marker::PhantomData};

/// A nestable critical section.
///
/// # Safety
///
/// Implementations must guarantee that, between a call to [`enter`] and the
/// matching call to [`exit`] which returns the [`depth`] to 0, no other
/// context which enters the same critical section runs.
///
/// [`enter`]: RawCriticalSection::enter
/// [`exit`]: RawCriticalSection::exit
/// [`depth`]: RawCriticalSection::depth
pub unsafe trait RawCriticalSection {
    /// Enters the critical section, blocking if it is held by another context.
    ///
    /// If the calling context is already inside the critical section, this
    /// increments the nesting depth.
    fn enter(&self);

    /// Exits one level of the critical section.
    ///
    /// # Safety
    ///
    /// This may only be called by a context which is inside the critical
    /// section, and must be paired with a previous call to
    /// [`enter`](Self::enter).
    unsafe fn exit(&self);

    /// Returns the nesting depth of the critical section for the calling
    /// context, or 0 if the calling context is not inside it.
    fn depth(&self) -> usize;

    /// Returns `true` if the calling context is inside the critical section.
    #[inline]
    fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Enters the critical section, returning a guard which exits it when
    /// dropped.
    #[track_caller]
    fn guard(&self) -> CriticalGuard<'_, Self>
    where
        Self: Sized,
    {
        self.enter();
        CriticalGuard {
            cs: self,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` inside the critical section.
    fn with<T>(&self, f: impl FnOnce() -> T) -> T
    where
        Self: Sized,
    {
        let _guard = self.guard();
        f()
    }
}

/// An RAII guard representing one level of a [`RawCriticalSection`].
///
/// The critical section is exited when the guard is dropped. A guard cannot
/// be sent to another thread, since critical sections are entered and exited
/// by the same context.
#[must_use = "if unused, the critical section will immediately be exited"]
pub struct CriticalGuard<'cs, CS: RawCriticalSection> {
    cs: &'cs CS,
    _not_send: PhantomData<*mut ()>,
}

/// An interrupt controller that can mask and unmask interrupts on the
/// current CPU core.
pub trait Interrupts {
    /// Disables interrupts.
    ///
    /// # Safety
    ///
    /// Disabling interrupts indefinitely may deadlock the system.
    unsafe fn disable(&self);

    /// Enables interrupts.
    ///
    /// # Safety
    ///
    /// Enabling interrupts may cause interrupt handlers to run, and must only
    /// be done when the interrupted code may be preempted.
    unsafe fn enable(&self);

    /// Returns `true` if interrupts are enabled.
    fn is_enabled(&self) -> bool;
}

/// A critical section for single-core systems which masks interrupts.
///
/// Entering the outermost level records whether interrupts were enabled and
/// disables them. Exiting the outermost level re-enables interrupts only if
/// they were enabled when the critical section was entered, so a
/// `MaskInterrupts` may be used from code that runs with interrupts already
/// masked (such as an interrupt handler).
///
/// This assumes a single CPU core; on a multi-core system, masking interrupts
/// on one core does not exclude code running on the others.
pub struct MaskInterrupts<I> {
    interrupts: I,
    depth: AtomicUsize,
    restore: AtomicBool,
}

/// A critical section for hosted systems.
///
/// On an operating system, user code cannot mask interrupts. Instead, a
/// `SpinCriticalSection` excludes other *threads*, which play the role of
/// interrupt handlers: only one thread may be inside the critical section at
/// a time, and other threads spin until it is exited. The critical section is
/// reentrant on the thread that holds it.
///
/// The `S` type parameter is the [`Scheduler`] used to identify the current
/// thread.
pub struct SpinCriticalSection<S> {
    lock: Spinlock,
    owner: AtomicUsize,
    depth: AtomicUsize,
    sched: S,
}

const UNOWNED: usize = 0;

// === impl CriticalGuard ===

impl<'cs, CS: RawCriticalSection> CriticalGuard<'cs, CS> {
    /// Returns the critical section this guard holds.
    #[inline]
    #[must_use]
    pub fn critical_section(&self) -> &'cs CS {
        self.cs
    }

    /// Returns `true` if this guard holds `cs`.
    #[inline]
    pub(crate) fn is_for(&self, cs: &CS) -> bool {
        core::ptr::eq(self.cs, cs)
    }
}

impl<CS: RawCriticalSection> Drop for CriticalGuard<'_, CS> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.cs.exit() }
    }
}

impl<CS: RawCriticalSection> fmt::Debug for CriticalGuard<'_, CS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalGuard")
            .field("cs", &format_args!("{:p}", self.cs))
            .field("depth", &self.cs.depth())
            .finish()
    }
}

// === impl MaskInterrupts ===

impl<I> MaskInterrupts<I> {
    loom_const_fn! {
        /// Returns a new critical section which masks interrupts using the
        /// provided interrupt controller.
        #[must_use]
        pub fn new(interrupts: I) -> Self {
            Self {
                interrupts,
                depth: AtomicUsize::new(0),
                restore: AtomicBool::new(false),
            }
        }
    }

    /// Returns a reference to the underlying interrupt controller.
    #[must_use]
    pub fn interrupts(&self) -> &I {
        &self.interrupts
    }
}

unsafe impl<I: Interrupts> RawCriticalSection for MaskInterrupts<I> {
    fn enter(&self) {
        let was_enabled = self.interrupts.is_enabled();
        unsafe { self.interrupts.disable() };
        // with interrupts masked, nothing else on this core touches the
        // depth until we're done.
        if self.depth.fetch_add(1, Relaxed) == 0 {
            self.restore.store(was_enabled, Relaxed);
            trace!(was_enabled, "MaskInterrupts::enter");
        }
    }

    unsafe fn exit(&self) {
        let depth = self.depth.fetch_sub(1, Relaxed);
        debug_assert_ne!(depth, 0, "exited a critical section that was not entered");
        if depth == 1 && self.restore.load(Relaxed) {
            trace!("MaskInterrupts::exit: re-enabling interrupts");
            self.interrupts.enable();
        }
    }

    #[inline]
    fn depth(&self) -> usize {
        self.depth.load(Relaxed)
    }
}

impl<I: fmt::Debug> fmt::Debug for MaskInterrupts<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskInterrupts")
            .field("interrupts", &self.interrupts)
            .field("depth", &self.depth.load(Relaxed))
            .field("restore", &self.restore.load(Relaxed))
            .finish()
    }
}

// === impl SpinCriticalSection ===

impl<S> SpinCriticalSection<S> {
    loom_const_fn! {
        /// Returns a new critical section, using `sched` to identify threads.
        #[must_use]
        pub fn with_scheduler(sched: S) -> Self {
            Self {
                lock: Spinlock::new(),
                owner: AtomicUsize::new(UNOWNED),
                depth: AtomicUsize::new(0),
                sched,
            }
        }
    }

    /// Returns a new critical section.
    #[must_use]
    pub fn new() -> Self
    where
        S: Default,
    {
        Self::with_scheduler(S::default())
    }
}

impl<S: Default> Default for SpinCriticalSection<S> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<S: Scheduler> RawCriticalSection for SpinCriticalSection<S> {
    fn enter(&self) {
        let me = self.sched.current_id();
        // only the owning thread ever stores its own ID, so if the owner is
        // us, nobody else can change it out from under us.
        if self.owner.load(Relaxed) == me {
            self.depth.fetch_add(1, Relaxed);
            return;
        }

        self.lock.lock();
        self.owner.store(me, Relaxed);
        self.depth.store(1, Relaxed);
    }

    unsafe fn exit(&self) {
        debug_assert_eq!(
            self.owner.load(Relaxed),
            self.sched.current_id(),
            "a critical section may only be exited by the thread inside it"
        );
        if self.depth.fetch_sub(1, Relaxed) == 1 {
            self.owner.store(UNOWNED, Relaxed);
            self.lock.unlock();
        }
    }

    fn depth(&self) -> usize {
        if self.owner.load(Relaxed) == self.sched.current_id() {
            self.depth.load(Relaxed)
        } else {
            0
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SpinCriticalSection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinCriticalSection")
            .field("owner", &self.owner.load(Relaxed))
            .field("depth", &self.depth.load(Relaxed))
            .field("sched", &self.sched)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests;
