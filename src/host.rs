//! Implementations for hosted environments.
//!
//! This module implements this crate's platform interfaces for ordinary
//! operating system threads, using the Rust standard library:
//!
//! - [`StdScheduler`] implements [`Scheduler`] using [`std::thread::park`].
//! - [`HostCriticalSection`] is a [`SpinCriticalSection`] which identifies
//!   threads using the [`StdScheduler`].
//! - [`HostEvents`] implements [`WaitForEvent`] by sleeping the thread.
//! - [`Clock::host`] measures time using [`std::time::Instant`].
//!
//! These are useful for testing code written against this crate's
//! condition variables, and for running it on a desktop operating system.
//!
//! [`Clock::host`]: crate::time::Clock::host
use crate::{
    critical::SpinCriticalSection,
    event::WaitForEvent,
    scheduler::{FlagsError, Scheduler, ThreadFlags},
    WAIT_FOREVER,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering::*},
        Arc, OnceLock,
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

/// A [`Scheduler`] for operating system threads.
///
/// Thread flags are stored in a per-thread atomic word, and blocking waits
/// [park](std::thread::park) the thread until a flag is set or the timeout
/// elapses.
#[derive(Copy, Clone, Debug, Default)]
pub struct StdScheduler {
    _p: (),
}

/// A handle to a thread managed by a [`StdScheduler`].
#[derive(Clone)]
pub struct StdThread {
    thread: Thread,
    flags: Arc<AtomicU32>,
}

/// A critical section for operating system threads.
///
/// See [`SpinCriticalSection`] for details.
pub type HostCriticalSection = SpinCriticalSection<StdScheduler>;

/// A [`WaitForEvent`] implementation which sleeps the calling thread.
///
/// Waiting sleeps in short naps, checking for a signal between them, until
/// the event is signalled or the caller's timeout elapses.
#[derive(Debug, Default)]
pub struct HostEvents {
    pending: AtomicBool,
}

/// How long [`HostEvents`] sleeps between checks for a signal.
const NAP: Duration = Duration::from_micros(250);

thread_local! {
    static CURRENT: StdThread = StdThread {
        thread: thread::current(),
        flags: Arc::new(AtomicU32::new(0)),
    };
}

// === impl StdScheduler ===

impl StdScheduler {
    /// Returns a new `StdScheduler`.
    #[must_use]
    pub const fn new() -> Self {
        Self { _p: () }
    }
}

impl Scheduler for StdScheduler {
    type Thread = StdThread;

    fn current(&self) -> StdThread {
        CURRENT.with(StdThread::clone)
    }

    fn current_id(&self) -> usize {
        // the flags word is allocated once per thread and lives as long as
        // the thread does, so its address identifies the thread.
        CURRENT.with(|current| Arc::as_ptr(&current.flags) as usize)
    }

    fn now(&self) -> u64 {
        host_micros() / 1_000
    }

    fn wait_flags(&self, flags: ThreadFlags, millis: u32) -> Result<ThreadFlags, FlagsError> {
        let deadline = match millis {
            WAIT_FOREVER => None,
            millis => Some(Instant::now() + Duration::from_millis(u64::from(millis))),
        };

        CURRENT.with(|current| loop {
            let prev = current.flags.fetch_and(!flags.bits(), AcqRel);
            let set = ThreadFlags::from_bits(prev).intersection(flags);
            if !set.is_empty() {
                return Ok(set);
            }

            if millis == 0 {
                return Err(FlagsError::Resource);
            }

            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FlagsError::Timeout);
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        })
    }

    fn set_flags(&self, thread: &StdThread, flags: ThreadFlags) -> Result<ThreadFlags, FlagsError> {
        let prev = thread.flags.fetch_or(flags.bits(), AcqRel);
        thread.thread.unpark();
        Ok(ThreadFlags::from_bits(prev | flags.bits()))
    }
}

// === impl StdThread ===

impl StdThread {
    /// Returns the current flags of this thread, without clearing them.
    #[must_use]
    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits(self.flags.load(Acquire))
    }

    /// Returns the standard library handle for this thread.
    #[must_use]
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

impl fmt::Debug for StdThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdThread")
            .field("id", &self.thread.id())
            .field("name", &self.thread.name())
            .field("flags", &self.flags())
            .finish()
    }
}

// === impl HostEvents ===

impl HostEvents {
    /// Returns a new `HostEvents` with no pending event.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }
}

impl WaitForEvent for HostEvents {
    fn wait_for_event(&self, timeout: Option<u32>) {
        let deadline = timeout.map(|ms| Instant::now() + Duration::from_millis(u64::from(ms)));
        while !self.pending.swap(false, AcqRel) {
            let nap = match deadline {
                None => NAP,
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => left.min(NAP),
                    _ => return,
                },
            };
            thread::sleep(nap);
            // without a deadline, nap once and let the caller re-check.
            if deadline.is_none() {
                return;
            }
        }
    }

    fn signal(&self) {
        self.pending.store(true, Release);
    }
}

/// Returns the number of microseconds elapsed since this function was first
/// called in this process.
pub fn host_micros() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
