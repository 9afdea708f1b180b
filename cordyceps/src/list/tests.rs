use super::*;
use std::{boxed::Box, ops::Range, pin::Pin, ptr::NonNull, vec, vec::Vec};

#[derive(Debug)]
#[repr(C)]
struct Entry<'a> {
    links: Links<Entry<'a>>,
    val: i32,
    _lt: std::marker::PhantomData<&'a ()>,
}

unsafe impl<'a> Linked<Links<Self>> for Entry<'a> {
    type Handle = Pin<&'a Entry<'a>>;

    fn into_ptr(handle: Pin<&'a Entry<'a>>) -> NonNull<Entry<'a>> {
        NonNull::from(handle.get_ref())
    }

    unsafe fn from_ptr(ptr: NonNull<Entry<'a>>) -> Pin<&'a Entry<'a>> {
        // Safety: the list only hands back pointers that it was given as
        // pinned references.
        Pin::new_unchecked(&*ptr.as_ptr())
    }

    unsafe fn links(target: NonNull<Entry<'a>>) -> NonNull<Links<Entry<'a>>> {
        // Safety: `links` is the first field of `Entry`, and `Entry` is
        // `repr(C)`.
        target.cast()
    }
}

fn entry<'a>(val: i32) -> Pin<Box<Entry<'a>>> {
    Box::pin(Entry {
        links: Links::new(),
        val,
        _lt: std::marker::PhantomData,
    })
}

fn ptr<'a>(r: &Pin<Box<Entry<'a>>>) -> NonNull<Entry<'a>> {
    r.as_ref().get_ref().into()
}

fn collect_vals(list: &List<Entry<'_>>) -> Vec<i32> {
    list.iter().map(|entry| entry.val).collect::<Vec<_>>()
}

fn list_from_iter<'a>(
    entries: impl IntoIterator<Item = &'a Pin<Box<Entry<'a>>>>,
) -> List<Entry<'a>> {
    let mut list = List::new();
    for entry in entries {
        list.push_back(entry.as_ref());
    }
    list
}

fn trace_init() -> tracing::dispatcher::DefaultGuard {
    use tracing_subscriber::prelude::*;
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .with_target(false)
        .with_timer(())
        .set_default()
}

#[test]
fn const_new() {
    const _: List<Entry> = List::new();
}

#[test]
fn send_sync() {
    crate::util::assert_send_sync::<List<Entry<'static>>>();
}

#[test]
fn empty_list() {
    let _trace = trace_init();

    let mut list = List::<Entry<'_>>::new();
    assert!(list.is_empty());
    assert_eq!(list.len(), 0);
    assert!(list.front().is_none());
    assert!(list.pop_front().is_none());
    assert_eq!(list.drain().count(), 0);
    list.assert_valid();
}

#[test]
fn pop_front_is_fifo() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);
    list.assert_valid();
    assert_eq!(list.len(), 3);

    assert_eq!(list.front(), Some(ptr(&a)));
    assert_eq!(list.pop_front().map(|e| e.val), Some(1));
    list.assert_valid();
    assert_eq!(list.pop_front().map(|e| e.val), Some(2));
    list.assert_valid();
    assert_eq!(list.pop_front().map(|e| e.val), Some(3));
    list.assert_valid();
    assert!(list.pop_front().is_none());
    assert!(list.is_empty());
}

#[test]
fn linked_flag_tracks_membership() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let mut list = List::new();
    assert!(!a.links.is_linked());

    // a lone entry has no neighbors, but is still a member.
    list.push_back(a.as_ref());
    assert!(a.links.is_linked());

    list.push_back(b.as_ref());
    assert!(b.links.is_linked());

    list.pop_front();
    assert!(!a.links.is_linked());
    assert!(b.links.is_linked());

    unsafe { list.remove(ptr(&b)) };
    assert!(!b.links.is_linked());
    assert!(list.is_empty());
}

#[test]
fn pushing_again_after_pop() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let mut list = list_from_iter([&a, &b]);

    let first = list.pop_front().expect("list has two entries");
    list.push_back(first);
    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![2, 1]);
}

#[test]
#[should_panic]
fn double_push_panics() {
    let a = entry(1);
    let mut list = List::<Entry<'_>>::new();
    list.push_back(a.as_ref());
    list.push_back(a.as_ref());
}

#[test]
fn remove_first() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);

    let removed = unsafe { list.remove(ptr(&a)) };
    assert_eq!(removed.map(|e| e.val), Some(1));
    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![2, 3]);
    assert_eq!(list.front(), Some(ptr(&b)));
}

#[test]
fn remove_middle() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);

    let removed = unsafe { list.remove(ptr(&b)) };
    assert_eq!(removed.map(|e| e.val), Some(2));
    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![1, 3]);
}

#[test]
fn remove_last() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);

    let removed = unsafe { list.remove(ptr(&c)) };
    assert_eq!(removed.map(|e| e.val), Some(3));
    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![1, 2]);

    // the new tail must accept appends.
    list.push_back(c.as_ref());
    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![1, 2, 3]);
}

#[test]
fn remove_only() {
    let _trace = trace_init();

    let a = entry(1);
    let mut list = list_from_iter([&a]);

    let removed = unsafe { list.remove(ptr(&a)) };
    assert_eq!(removed.map(|e| e.val), Some(1));
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn remove_unlinked_is_noop() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let mut list = list_from_iter([&a]);

    assert!(unsafe { list.remove(ptr(&b)) }.is_none());
    assert_eq!(list.len(), 1);

    // removing twice only takes effect once.
    assert!(unsafe { list.remove(ptr(&a)) }.is_some());
    assert!(unsafe { list.remove(ptr(&a)) }.is_none());
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn drain_unlinks_before_yielding() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);
    let mut other = List::new();

    // every drained entry can be handed straight to another list.
    let mut drained = vec![];
    for entry in list.drain() {
        assert!(!entry.links.is_linked());
        drained.push(entry.val);
        other.push_back(entry);
    }

    assert_eq!(drained, vec![1, 2, 3]);
    assert!(list.is_empty());
    list.assert_valid();
    other.assert_valid();
    assert_eq!(collect_vals(&other), vec![1, 2, 3]);
}

#[test]
fn partial_drain_leaves_rest() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let c = entry(3);
    let mut list = list_from_iter([&a, &b, &c]);

    let mut drain = list.drain();
    assert_eq!(drain.len(), 3);
    assert_eq!(drain.next().map(|e| e.val), Some(1));
    drop(drain);

    list.assert_valid();
    assert_eq!(collect_vals(&list), vec![2, 3]);
}

#[test]
fn iter_len() {
    let a = entry(1);
    let b = entry(2);
    let list = list_from_iter([&a, &b]);

    let mut iter = list.iter();
    assert_eq!(iter.len(), 2);
    iter.next();
    assert_eq!(iter.len(), 1);
    iter.next();
    assert_eq!(iter.len(), 0);
    assert!(iter.next().is_none());
}

#[derive(Debug)]
enum Op {
    PushBack,
    PopFront,
    Remove(usize),
    Drain,
}

use proptest::collection::vec;
use proptest::num::usize::ANY;

#[cfg(miri)]
const FUZZ_RANGE: Range<usize> = 0..10;

/// The default range for proptest's vec strategy is 0..100.
#[cfg(not(miri))]
const FUZZ_RANGE: Range<usize> = 0..100;

proptest::proptest! {
    #[test]
    fn fuzz_wait_list(ops in vec(ANY, FUZZ_RANGE)) {
        let ops = ops
            .iter()
            .map(|i| match i % 7 {
                0..=2 => Op::PushBack,
                3 | 4 => Op::PopFront,
                5 => Op::Remove(i / 7),
                6 => Op::Drain,
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();

        let _trace = trace_init();
        let _span = tracing::info_span!("fuzz").entered();
        tracing::info!(?ops);
        run_fuzz(ops);
    }
}

fn run_fuzz(ops: Vec<Op>) {
    use std::collections::VecDeque;

    let entries: Vec<_> = (0..ops.len()).map(|i| entry(i as i32)).collect();
    let mut ll = List::<Entry<'_>>::new();
    let mut reference = VecDeque::new();

    for (i, op) in ops.iter().enumerate() {
        let _span = tracing::info_span!("op", ?i, ?op).entered();
        match op {
            Op::PushBack => {
                reference.push_back(i as i32);
                ll.push_back(entries[i].as_ref());
            }
            Op::PopFront => {
                let v = reference.pop_front();
                assert_eq!(v, ll.pop_front().map(|v| v.val));
            }
            Op::Remove(n) => {
                if reference.is_empty() {
                    assert!(ll.is_empty());
                    tracing::debug!("skipping remove; list is empty");
                    continue;
                }

                let idx = n % reference.len();
                let expect = reference.remove(idx).unwrap();

                unsafe {
                    let entry = ll.remove(ptr(&entries[expect as usize])).unwrap();
                    assert_eq!(expect, entry.val);
                }
            }
            Op::Drain => {
                let expect = reference.drain(..).collect::<Vec<_>>();
                let actual = ll.drain().map(|e| e.val).collect::<Vec<_>>();
                assert_eq!(expect, actual);
            }
        }
        assert_eq!(ll.len(), reference.len());
        ll.assert_valid();
    }

    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(
            entry.links.is_linked(),
            reference.contains(&(i as i32)),
            "entry {i} linked flag must match membership"
        );
    }
}
