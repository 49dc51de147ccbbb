//! Timed-wait acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A 50ms `wait_for` with no notifier reports `TimedOut`
//! - It never returns before 50ms have elapsed
//! - Concurrent timed waits on one condition variable all honor their timeout

use super::common::{shared, spread};
use monocv_common::MonotonicTime;
use monocv_sync::{MonotonicCondvar, WaitStatus};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_millis(50);

#[test]
fn test_repeated_timed_waits_never_return_early() {
    let state = shared(());
    let mut elapsed = Vec::new();

    for _ in 0..10 {
        let mut lock = state.mutex.lock().unwrap();
        let start = Instant::now();
        let status = state.cv.wait_for(&mut lock, TIMEOUT).unwrap();
        let took = start.elapsed();

        // Spurious wakeups are allowed; early timeouts are not.
        if status == WaitStatus::TimedOut {
            assert!(took >= TIMEOUT, "timed out after only {took:?}");
            elapsed.push(took);
        }
    }

    let s = spread(&elapsed);
    println!("timed waits: min {:?} mean {:?} max {:?}", s.min, s.mean, s.max);
    assert!(s.min >= TIMEOUT);
}

#[test]
fn test_concurrent_timed_waits() {
    const WAITERS: usize = 4;
    let state = shared(());

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let state = std::sync::Arc::clone(&state);
            thread::spawn(move || {
                let mut lock = state.mutex.lock().unwrap();
                let start = Instant::now();
                let ok = state.cv.wait_for_pred(&mut lock, TIMEOUT, |_| false).unwrap();
                (ok, start.elapsed())
            })
        })
        .collect();

    for handle in handles {
        let (ok, took) = handle.join().unwrap();
        assert!(!ok);
        assert!(took >= TIMEOUT, "predicate wait gave up after {took:?}");
    }
}

#[test]
fn test_absolute_monotonic_deadline() {
    let state = shared(());
    let mut lock = state.mutex.lock().unwrap();

    let deadline = MonotonicTime::deadline_after(TIMEOUT).unwrap();
    let mut status = WaitStatus::Signaled;
    while status == WaitStatus::Signaled {
        status = state.cv.wait_deadline(&mut lock, deadline).unwrap();
    }

    assert!(MonotonicTime::now().unwrap() >= deadline);
}

#[test]
fn test_churn_while_waiting() {
    // Unrelated condition variables being created and destroyed must not
    // disturb a waiter on a long-lived one.
    let state = shared(false);

    let waiter = {
        let state = std::sync::Arc::clone(&state);
        thread::spawn(move || {
            let mut lock = state.mutex.lock().unwrap();
            state
                .cv
                .wait_for_pred(&mut lock, Duration::from_secs(10), |done| *done)
                .unwrap()
        })
    };

    for _ in 0..1_000 {
        drop(MonotonicCondvar::new().unwrap());
    }
    *state.mutex.lock().unwrap() = true;
    state.cv.notify_all().unwrap();

    assert!(waiter.join().unwrap());
}
