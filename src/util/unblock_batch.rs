use crate::scheduler::{Scheduler, ThreadFlags};

/// A utility for unblocking multiple threads in a batch, without allocating.
///
/// This is an array of thread handles which can be filled while inside a
/// critical section, and then signalled once the critical section has been
/// exited. Doing this in batches, rather than signalling every thread from
/// inside the critical section, bounds the amount of time interrupts stay
/// masked regardless of how many threads are waiting.
pub(crate) struct UnblockBatch<S: Scheduler> {
    len: usize,
    threads: [Option<S::Thread>; MAX_UNBLOCKS],
}

// when running loom tests, make the max much lower, so we can exercise behavior
// involving multiple critical sections.
const MAX_UNBLOCKS: usize = if cfg!(loom) { 1 } else { 16 };

impl<S: Scheduler> UnblockBatch<S> {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            len: 0,
            threads: [const { None }; MAX_UNBLOCKS],
        }
    }

    /// Returns `true` if there is room for one or more additional threads in
    /// this batch.
    #[inline]
    pub(crate) fn can_add(&self) -> bool {
        self.len < MAX_UNBLOCKS
    }

    /// Adds a thread to the batch, returning `true` if the batch still has
    /// capacity for another one.
    pub(crate) fn add(&mut self, thread: S::Thread) -> bool {
        debug_assert!(self.can_add());
        self.threads[self.len] = Some(thread);
        self.len += 1;
        self.can_add()
    }

    /// Sets the [`UNBLOCK`](ThreadFlags::UNBLOCK) flag on every thread in the
    /// batch, and empties it.
    pub(crate) fn unblock_all(&mut self, sched: &S) {
        let len = core::mem::replace(&mut self.len, 0);
        for thread in self.threads[..len].iter_mut().filter_map(Option::take) {
            unblock(sched, &thread);
        }
    }
}

/// Sets the [`UNBLOCK`](ThreadFlags::UNBLOCK) flag on `thread`.
///
/// A thread that stopped waiting before its flag was set may have exited
/// already, so failing to set the flag is not an error.
pub(crate) fn unblock<S: Scheduler>(sched: &S, thread: &S::Thread) {
    match sched.set_flags(thread, ThreadFlags::unblock()) {
        Ok(_flags) => {
            trace!(?thread, flags = ?_flags, "unblocked thread");
        }
        Err(_error) => {
            debug!(?thread, error = %_error, "thread could not be unblocked");
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::host::StdScheduler;

    #[test]
    fn fills_up() {
        let sched = StdScheduler::new();
        let mut batch = UnblockBatch::<StdScheduler>::new();
        for _ in 0..MAX_UNBLOCKS - 1 {
            assert!(batch.add(sched.current()));
        }
        assert!(!batch.add(sched.current()));
        assert!(!batch.can_add());

        batch.unblock_all(&sched);
        assert!(batch.can_add());

        // every handle pointed at this thread, so the flag is now set.
        assert_eq!(
            sched.wait_flags(ThreadFlags::unblock(), 0),
            Ok(ThreadFlags::unblock())
        );
        assert_eq!(
            sched.wait_flags(ThreadFlags::unblock(), 0),
            Err(crate::FlagsError::Resource)
        );
    }
}
