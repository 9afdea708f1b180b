use super::*;
use crate::loom::{self, sched::ModelScheduler, sync::Arc, thread};

#[test]
fn release_wakes_blocked_owner() {
    loom::bounded(|| {
        let sched = ModelScheduler;
        let sem = Arc::new(Semaphore::new(&sched, 0));

        let releaser = thread::spawn({
            let sem = sem.clone();
            move || sem.release(&ModelScheduler)
        });

        assert!(sem.acquire(&sched, WAIT_FOREVER));
        releaser.join().unwrap();
        assert_eq!(sem.permits(), 0);
    });
}

#[test]
fn timed_acquire_races_release() {
    loom::bounded(|| {
        let sched = ModelScheduler;
        let sem = Arc::new(Semaphore::new(&sched, 0));

        let releaser = thread::spawn({
            let sem = sem.clone();
            move || sem.release(&ModelScheduler)
        });

        let acquired = sem.acquire(&sched, 10);
        releaser.join().unwrap();

        // either the permit was taken, or it is still there.
        let expected = if acquired { 0 } else { 1 };
        assert_eq!(sem.permits(), expected);
    });
}
