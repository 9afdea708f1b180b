use super::*;
use crate::{
    host::{HostCriticalSection, StdScheduler},
    loom::{self, thread},
};
use std::sync::atomic::{AtomicBool as StdAtomicBool, AtomicUsize as StdAtomicUsize};

#[derive(Debug, Default)]
struct FakeInterrupts {
    enabled: StdAtomicBool,
    disables: StdAtomicUsize,
}

impl FakeInterrupts {
    fn enabled() -> Self {
        Self {
            enabled: StdAtomicBool::new(true),
            disables: StdAtomicUsize::new(0),
        }
    }
}

impl Interrupts for FakeInterrupts {
    unsafe fn disable(&self) {
        self.disables.fetch_add(1, SeqCst);
        self.enabled.store(false, SeqCst);
    }

    unsafe fn enable(&self) {
        self.enabled.store(true, SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(SeqCst)
    }
}

#[test]
fn mask_interrupts_nests() {
    let cs = MaskInterrupts::new(FakeInterrupts::enabled());
    assert!(!cs.is_active());

    let outer = cs.guard();
    assert!(!cs.interrupts().is_enabled());
    assert_eq!(cs.depth(), 1);

    cs.with(|| {
        assert_eq!(cs.depth(), 2);
        assert!(!cs.interrupts().is_enabled());
    });

    // leaving the inner level must not unmask interrupts.
    assert_eq!(cs.depth(), 1);
    assert!(!cs.interrupts().is_enabled());

    drop(outer);
    assert_eq!(cs.depth(), 0);
    assert!(cs.interrupts().is_enabled());
}

#[test]
fn mask_interrupts_preserves_disabled_state() {
    // e.g. entering a critical section from an interrupt handler.
    let cs = MaskInterrupts::new(FakeInterrupts::default());
    assert!(!cs.interrupts().is_enabled());

    cs.with(|| assert!(cs.is_active()));

    assert!(!cs.is_active());
    assert!(
        !cs.interrupts().is_enabled(),
        "exiting must not enable interrupts that were disabled on entry"
    );
    assert_eq!(cs.interrupts().disables.load(SeqCst), 1);
}

#[test]
fn guard_knows_its_critical_section() {
    let cs1 = HostCriticalSection::new();
    let cs2 = HostCriticalSection::new();

    let guard = cs1.guard();
    assert!(guard.is_for(&cs1));
    assert!(!guard.is_for(&cs2));
    assert!(core::ptr::eq(guard.critical_section(), &cs1));
}

#[test]
fn spin_critical_section_is_reentrant() {
    loom::model(|| {
        let cs = SpinCriticalSection::<StdScheduler>::new();
        assert_eq!(cs.depth(), 0);

        let _outer = cs.guard();
        let inner = cs.guard();
        assert_eq!(cs.depth(), 2);
        drop(inner);
        assert_eq!(cs.depth(), 1);

        thread::scope(|scope| {
            thread::spawn(scope, || {
                // the critical section is held by another thread, so this
                // thread is not inside it.
                assert_eq!(cs.depth(), 0);
                assert!(!cs.is_active());
            })
            .join()
            .unwrap();
        });
    });
}

#[test]
fn spin_critical_section_excludes_threads() {
    const THREADS: usize = 4;
    const ITERS: usize = 100;

    loom::model(|| {
        let cs = HostCriticalSection::new();
        let inside = StdAtomicBool::new(false);
        let count = StdAtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                thread::spawn(scope, || {
                    for _ in 0..ITERS {
                        cs.with(|| {
                            assert!(!inside.swap(true, SeqCst), "two threads inside");
                            count.fetch_add(1, SeqCst);
                            inside.store(false, SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(count.load(SeqCst), THREADS * ITERS);
    });
}
