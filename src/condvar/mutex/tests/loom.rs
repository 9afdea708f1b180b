use super::*;
use crate::loom::{self, sched::ModelScheduler, sync::Arc, thread};
use std::boxed::Box;

type ModelMutex<T> = Mutex<T, ModelScheduler>;
type ModelCondvar<T> = MutexCondvar<'static, T, ModelScheduler>;

/// Returns a condition variable paired with a new mutex protecting `data`.
///
/// Loom threads must be `'static`, so the mutex is leaked.
fn condvar<T>(data: T) -> Arc<ModelCondvar<T>> {
    let mutex: &'static ModelMutex<T> = Box::leak(Box::new(ModelMutex::new(data)));
    Arc::new(MutexCondvar::new(mutex))
}

#[test]
fn notify_one_wakes_waiter() {
    loom::bounded(|| {
        let cv = condvar(false);

        let waiter = thread::spawn({
            let cv = cv.clone();
            move || {
                let mut ready = cv.lock();
                while !*ready {
                    cv.wait(&mut ready);
                }
            }
        });

        {
            let mut ready = cv.lock();
            *ready = true;
            cv.notify_one();
        }

        waiter.join().unwrap();
    });
}

#[test]
fn timeout_races_notify_one() {
    loom::bounded(|| {
        // (waiting, notified)
        let cv = condvar((false, false));

        let waiter = thread::spawn({
            let cv = cv.clone();
            move || {
                let mut lock = cv.lock();
                lock.0 = true;
                let timed_out = cv.wait_for(&mut lock, 10);
                lock.0 = false;
                timed_out
            }
        });

        {
            let mut lock = cv.lock();
            if lock.0 {
                cv.notify_one();
                lock.1 = true;
            }
        }

        let timed_out = waiter.join().unwrap();
        let lock = cv.lock();
        assert_eq!(timed_out, !lock.1);
        assert!(cv.with_waiters(|waiters| waiters.is_empty()));
    });
}

#[test]
fn notify_all_wakes_two() {
    loom::bounded(|| {
        let cv = condvar(false);

        let waiters = (0..2)
            .map(|_| {
                let cv = cv.clone();
                thread::spawn(move || {
                    let mut done = cv.lock();
                    while !*done {
                        cv.wait(&mut done);
                    }
                })
            })
            .collect::<std::vec::Vec<_>>();

        {
            let mut done = cv.lock();
            *done = true;
            cv.notify_all();
        }

        for waiter in waiters {
            waiter.join().unwrap();
        }
    });
}
