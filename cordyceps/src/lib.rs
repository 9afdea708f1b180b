//! Intrusive wait lists for blocking synchronization primitives.
//!
//! ## Intrusive data structures
//!
//! An _intrusive_ collection stores its links inside the elements themselves,
//! rather than in separately allocated wrapper nodes. This means that adding
//! an element to a collection never allocates: the element brings its own
//! storage for the pointers to its neighbors. The price is that an element
//! must not move or be dropped while it is a member of a collection.
//!
//! That trade-off is a perfect fit for wait lists. A thread that blocks on a
//! condition variable owns a waiter record on its own stack for exactly as
//! long as it is blocked, and the condition variable only needs to borrow that
//! record while the thread sleeps. The [`list::List`] type in this crate is a
//! doubly-linked list built for that use: it supports appending a waiter,
//! removing the first waiter (for first-in, first-out wakeups), removing an
//! arbitrary waiter (for timeouts), and draining every waiter (for broadcast
//! wakeups), all without touching the heap.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

#[cfg(test)]
extern crate std;

#[macro_use]
pub(crate) mod util;

pub mod list;

#[doc(inline)]
pub use list::List;

use core::ptr::NonNull;

/// Trait implemented by types which can be members of an [intrusive
/// collection](crate#intrusive-data-structures).
///
/// In order to be part of a [`List`], a type must contain a [`list::Links`]
/// value and implement this trait for `list::Links<Self>`.
///
/// # Safety
///
/// This is unsafe to implement because it's the implementation's
/// responsibility to ensure that types implementing this trait are valid
/// intrusive collection nodes. In particular:
///
/// - Implementors **must** stay pinned in memory while they are in an intrusive
///   collection. While a `Linked` value is in a list, it may not be
///   deallocated or moved to a different memory location.
/// - The type implementing this trait **must not** implement [`Unpin`].
/// - [`Linked::links`] must always return a pointer to the *same* `Links` for
///   a given node.
///
/// Failure to uphold these invariants will result in corruption of the
/// intrusive data structure, including dangling pointers.
///
/// [`Unpin`]: core::marker::Unpin
pub unsafe trait Linked<L> {
    /// The handle owning nodes in the linked list.
    ///
    /// For wait lists, this is typically a `NonNull<Self>` borrowed from a
    /// pinned stack frame, since the collection never owns its waiters.
    type Handle;

    /// Convert a [`Self::Handle`] to a raw pointer to `Self`.
    fn into_ptr(r: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer to `Self` back into a [`Self::Handle`].
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid instance of `Self` which was
    /// previously converted into a pointer by [`Linked::into_ptr`].
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the node pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid instance of `Self` (e.g. it does not
    /// dangle).
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<L>;
}
