//! An intrusive doubly-linked wait list.
//!
//! See the [`List`] type for details.
use super::Linked;
use crate::util::FmtOption;
use core::{
    cell::UnsafeCell,
    fmt,
    iter::FusedIterator,
    marker::PhantomPinned,
    ptr::NonNull,
};

#[cfg(test)]
mod tests;

/// An [intrusive] doubly-linked list of waiters.
///
/// Entries are appended to the back of the list with [`List::push_back`] and
/// taken from the front with [`List::pop_front`], so the list behaves as a
/// first-in, first-out queue: the entry that has been waiting the longest is
/// always the next one out. Any entry may also be unlinked directly with
/// [`List::remove`], in constant time, given a pointer to it. This is what a
/// waiter whose timeout elapsed uses to take itself back out of the list.
///
/// Every [`Links`] tracks whether its entry is currently a member of a list
/// (see [`Links::is_linked`]). The list sets that flag when an entry is
/// pushed, and clears it when the entry is popped, removed or drained. Code
/// that shares entries between the list's owner and the entry's owner can use
/// the flag as the single source of truth for membership, provided that both
/// sides only look at it while holding whatever lock protects the list.
///
/// In order to be part of a `List`, a type `T` must implement [`Linked`] for
/// [`list::Links<T>`].
///
/// # Examples
///
/// ```
/// use cordyceps::{Linked, list::{self, List}};
/// use core::{pin::Pin, ptr::NonNull};
///
/// #[repr(C)]
/// struct Waiter {
///     links: list::Links<Waiter>,
///     id: usize,
/// }
///
/// unsafe impl Linked<list::Links<Waiter>> for Waiter {
///     type Handle = NonNull<Waiter>;
///
///     fn into_ptr(handle: NonNull<Waiter>) -> NonNull<Waiter> {
///         handle
///     }
///
///     unsafe fn from_ptr(ptr: NonNull<Waiter>) -> NonNull<Waiter> {
///         ptr
///     }
///
///     unsafe fn links(target: NonNull<Waiter>) -> NonNull<list::Links<Waiter>> {
///         // `links` is the first field of a `repr(C)` struct.
///         target.cast()
///     }
/// }
///
/// let a = Box::pin(Waiter { links: list::Links::new(), id: 1 });
/// let b = Box::pin(Waiter { links: list::Links::new(), id: 2 });
///
/// let mut list = List::<Waiter>::new();
/// list.push_back(NonNull::from(&*a));
/// list.push_back(NonNull::from(&*b));
/// assert!(a.links.is_linked());
///
/// // Waiters come back out in the order they went in.
/// let first = list.pop_front().unwrap();
/// assert_eq!(unsafe { first.as_ref() }.id, 1);
/// assert!(!a.links.is_linked());
///
/// // A specific waiter can be taken out of the list directly.
/// unsafe { list.remove(NonNull::from(&*b)) };
/// assert!(list.is_empty());
/// ```
///
/// [intrusive]: crate#intrusive-data-structures
/// [`list::Links<T>`]: crate::list::Links
pub struct List<T: ?Sized> {
    head: Link<T>,
    tail: Link<T>,
    len: usize,
}

/// Links to other nodes in a [`List`].
///
/// In order to be part of a [`List`], a type must contain an instance of this
/// type, and must implement the [`Linked`] trait for `Links<Self>`.
pub struct Links<T: ?Sized> {
    inner: UnsafeCell<LinksInner<T>>,
}

/// Iterates over the items in a [`List`] by reference.
pub struct Iter<'a, T: Linked<Links<T>> + ?Sized> {
    _list: &'a List<T>,
    curr: Link<T>,
    len: usize,
}

/// Removes every entry from a [`List`], front to back.
///
/// Each entry is fully unlinked before it is yielded, so the consumer may do
/// whatever it likes with the entry (including handing it to another list)
/// while the drain is still in progress. Entries that were not yet yielded
/// when the `Drain` is dropped stay in the list.
///
/// This is returned by [`List::drain`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Drain<'a, T: Linked<Links<T>> + ?Sized> {
    list: &'a mut List<T>,
}

type Link<T> = Option<NonNull<T>>;

#[repr(C)]
struct LinksInner<T: ?Sized> {
    next: Link<T>,
    prev: Link<T>,
    linked: bool,
    /// Linked list links must always be `!Unpin`, in order to ensure that they
    /// never recieve LLVM `noalias` annotations; see also
    /// <https://github.com/rust-lang/rust/issues/63818>.
    _unpin: PhantomPinned,
}

// ==== impl List ====

impl<T: ?Sized> List<T> {
    /// Returns a new empty list.
    #[must_use]
    pub const fn new() -> List<T> {
        List {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns `true` if this list is empty.
    pub fn is_empty(&self) -> bool {
        if self.head.is_none() {
            debug_assert!(
                self.tail.is_none(),
                "inconsistent state: a list had a tail but no head!"
            );
            debug_assert_eq!(self.len, 0, "inconsistent state: empty list with a length");
            return true;
        }

        false
    }

    /// Returns the number of entries in the list.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl<T: Linked<Links<T>> + ?Sized> List<T> {
    /// Asserts as many of the linked list's invariants as possible.
    #[track_caller]
    pub fn assert_valid(&self) {
        let Some(head) = self.head else {
            assert!(
                self.tail.is_none(),
                "if the linked list's head is null, the tail must also be null"
            );
            assert_eq!(self.len, 0, "if the linked list's head is null, its length must be 0");
            return;
        };

        let tail = self
            .tail
            .expect("if the linked list has a head, it must also have a tail");

        let mut prev = None;
        let mut curr = Some(head);
        let mut seen = 0;
        while let Some(node) = curr {
            let links = unsafe { T::links(node).as_ref() };
            assert!(links.is_linked(), "every reachable node must be marked as linked");
            assert_eq!(
                links.prev(),
                prev,
                "node {node:p}'s prev link must point at the node before it"
            );
            if links.next().is_none() {
                assert_eq!(node, tail, "the last reachable node must be the tail");
            }
            seen += 1;
            prev = curr;
            curr = links.next();
        }

        assert_eq!(seen, self.len, "the list's length must match its reachable nodes");
    }

    /// Appends an item to the tail of the list.
    ///
    /// This is an O(1) operation.
    ///
    /// # Panics
    ///
    /// If the item is already a member of a list.
    #[track_caller]
    pub fn push_back(&mut self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        test_trace!(?ptr, len = self.len, "List::push_back");
        unsafe {
            let links = T::links(ptr).as_mut();
            assert!(
                !links.is_linked(),
                "a node may only be added to a list it is not already a member of"
            );
            links.set_next(None);
            links.set_prev(self.tail);
            links.set_linked(true);
            if let Some(tail) = self.tail {
                T::links(tail).as_mut().set_next(Some(ptr));
            }
        }

        self.tail = Some(ptr);
        if self.head.is_none() {
            self.head = Some(ptr);
        }
        self.len += 1;
    }

    /// Removes the item at the head of the list, if there is one.
    ///
    /// This is an O(1) operation.
    pub fn pop_front(&mut self) -> Option<T::Handle> {
        let head = self.head?;
        test_trace!(?head, len = self.len, "List::pop_front");

        unsafe {
            let head_links = T::links(head).as_mut();
            self.head = head_links.next();
            if let Some(next) = head_links.next() {
                T::links(next).as_mut().set_prev(None);
            } else {
                self.tail = None;
            }

            head_links.unlink();
            self.len -= 1;
            Some(T::from_ptr(head))
        }
    }

    /// Returns a pointer to the item at the head of the list, without
    /// removing it.
    #[inline]
    #[must_use]
    pub fn front(&self) -> Option<NonNull<T>> {
        self.head
    }

    /// Remove an arbitrary node from the list.
    ///
    /// This is an O(1) operation. If the node is not linked into a list,
    /// nothing happens and this returns `None`.
    ///
    /// # Safety
    ///
    /// The caller *must* ensure that the node is either unlinked, or an element
    /// of *this* list, and not any other list.
    pub unsafe fn remove(&mut self, item: NonNull<T>) -> Option<T::Handle> {
        let links = T::links(item).as_mut();
        test_trace!(?item, linked = links.is_linked(), "List::remove");
        if !links.is_linked() {
            return None;
        }

        let prev = links.set_prev(None);
        let next = links.set_next(None);

        if let Some(prev) = prev {
            T::links(prev).as_mut().set_next(next);
        } else {
            debug_assert_eq!(
                self.head,
                Some(item),
                "a linked node with no prev link must be the head of its list"
            );
            self.head = next;
        }

        if let Some(next) = next {
            T::links(next).as_mut().set_prev(prev);
        } else {
            debug_assert_eq!(
                self.tail,
                Some(item),
                "a linked node with no next link must be the tail of its list"
            );
            self.tail = prev;
        }

        links.set_linked(false);
        self.len -= 1;
        Some(T::from_ptr(item))
    }

    /// Returns an iterator which removes every item in the list, in
    /// first-in, first-out order.
    ///
    /// Unlike [`iter`](Self::iter), the current item may be handed off or
    /// released while iteration continues, since each item is unlinked before
    /// it is yielded.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { list: self }
    }

    /// Returns an iterator over the items in this list, by reference.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            _list: self,
            curr: self.head,
            len: self.len,
        }
    }
}

unsafe impl<T: Linked<Links<T>> + ?Sized> Send for List<T> where T: Send {}
unsafe impl<T: Linked<Links<T>> + ?Sized> Sync for List<T> where T: Sync {}

impl<T: ?Sized> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("head", &FmtOption::new(&self.head))
            .field("tail", &FmtOption::new(&self.tail))
            .field("len", &self.len)
            .finish()
    }
}

// ==== impl Links ====

impl<T: ?Sized> Links<T> {
    /// Returns new links for a [doubly-linked intrusive list](List).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LinksInner {
                next: None,
                prev: None,
                linked: false,
                _unpin: PhantomPinned,
            }),
        }
    }

    /// Returns `true` if this node is currently a member of a list.
    ///
    /// Unlike checking the `next` and `prev` pointers, this is also `true` for
    /// the only node in a single-element list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        unsafe { (*self.inner.get()).linked }
    }

    #[inline]
    fn next(&self) -> Link<T> {
        unsafe { (*self.inner.get()).next }
    }

    #[inline]
    fn prev(&self) -> Link<T> {
        unsafe { (*self.inner.get()).prev }
    }

    #[inline]
    fn set_next(&mut self, next: Link<T>) -> Link<T> {
        core::mem::replace(&mut self.inner.get_mut().next, next)
    }

    #[inline]
    fn set_prev(&mut self, prev: Link<T>) -> Link<T> {
        core::mem::replace(&mut self.inner.get_mut().prev, prev)
    }

    #[inline]
    fn set_linked(&mut self, linked: bool) {
        self.inner.get_mut().linked = linked;
    }

    fn unlink(&mut self) {
        let inner = self.inner.get_mut();
        inner.next = None;
        inner.prev = None;
        inner.linked = false;
    }
}

impl<T: ?Sized> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("self", &format_args!("{self:p}"))
            .field("next", &FmtOption::new(&self.next()))
            .field("prev", &FmtOption::new(&self.prev()))
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// # Safety
///
/// Types containing [`Links`] may be `Send`: the pointers within the `Links` may
/// mutably alias another value, but the links can only be _accessed_ by the
/// owner of the [`List`] itself, because the pointers are private. As long as
/// [`List`] upholds its own invariants, `Links` should not make a type `!Send`.
unsafe impl<T: Send> Send for Links<T> {}

/// # Safety
///
/// Types containing [`Links`] may be `Sync`: the pointers within the `Links`
/// may mutably alias another value, but the links can only be _accessed_ by
/// the owner of the [`List`] itself, because the pointers are private. As long
/// as [`List`] upholds its own invariants, `Links` should not make a type
/// `!Sync`.
unsafe impl<T: Sync> Sync for Links<T> {}

// === impl Iter ====

impl<'a, T: Linked<Links<T>> + ?Sized> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = self.curr?;
        self.len -= 1;
        unsafe {
            // safety: it is safe for us to borrow `curr`, because the iterator
            // borrows the `List`, ensuring that the list will not be dropped
            // while the iterator exists. the returned item will not outlive
            // the iterator.
            self.curr = T::links(curr).as_ref().next();
            Some(curr.as_ref())
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<T: Linked<Links<T>> + ?Sized> ExactSizeIterator for Iter<'_, T> {}

impl<T: Linked<Links<T>> + ?Sized> FusedIterator for Iter<'_, T> {}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("curr", &FmtOption::new(&self.curr))
            .field("len", &self.len)
            .finish()
    }
}

// === impl Drain ====

impl<T: Linked<Links<T>> + ?Sized> Iterator for Drain<'_, T> {
    type Item = T::Handle;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.list.pop_front()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.list.len, Some(self.list.len))
    }
}

impl<T: Linked<Links<T>> + ?Sized> ExactSizeIterator for Drain<'_, T> {}

impl<T: Linked<Links<T>> + ?Sized> FusedIterator for Drain<'_, T> {}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Drain<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain").field("list", &self.list).finish()
    }
}
