#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

#[cfg(test)]
extern crate alloc;

pub(crate) mod loom;

#[macro_use]
pub mod util;

pub mod blocking;
pub mod condvar;
pub mod critical;
pub mod event;
pub mod poll;
pub mod scheduler;
pub mod semaphore;
pub mod spin;
pub mod time;

#[cfg(all(any(feature = "std", test), not(loom)))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod host;

#[doc(inline)]
pub use self::blocking::{Mutex, MutexGuard};
#[doc(inline)]
pub use self::condvar::{
    ConditionVariable, CriticalCondvar, MutexCondvar, PollingCondvar, TimedConditionVariable,
    WAIT_FOREVER,
};
#[doc(inline)]
pub use self::critical::{CriticalGuard, RawCriticalSection};
#[doc(inline)]
pub use self::poll::PollWaker;
#[doc(inline)]
pub use self::scheduler::{FlagsError, Scheduler, ThreadFlags};
