//! Hand-off acceptance tests.
//!
//! Threads pass a token around a ring, each waiting for its turn with
//! `wait_pred` and waking everyone with `notify_all`. Every turn must be
//! taken exactly once and in order.

use super::common::{num_cpus, shared};
use crossbeam_utils::sync::WaitGroup;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Ring {
    turn: usize,
    log: Vec<usize>,
}

#[test]
fn test_token_ring() {
    let threads = num_cpus().clamp(2, 8);
    const LAPS: usize = 200;
    let state = shared(Ring::default());
    let started = WaitGroup::new();

    let handles: Vec<_> = (0..threads)
        .map(|id| {
            let state = Arc::clone(&state);
            let started = started.clone();
            thread::spawn(move || {
                drop(started);
                for _ in 0..LAPS {
                    let mut lock = state.mutex.lock().unwrap();
                    let ok = state
                        .cv
                        .wait_for_pred(&mut lock, Duration::from_secs(10), |ring| {
                            ring.turn % threads == id
                        })
                        .unwrap();
                    assert!(ok, "thread {id} never got its turn");
                    lock.log.push(id);
                    lock.turn += 1;
                    state.cv.notify_all().unwrap();
                }
            })
        })
        .collect();

    started.wait();
    let start = Instant::now();
    for handle in handles {
        handle.join().unwrap();
    }
    println!("{threads} threads x {LAPS} laps in {:?}", start.elapsed());

    let lock = state.mutex.lock().unwrap();
    assert_eq!(lock.turn, threads * LAPS);
    assert!(lock.log.iter().enumerate().all(|(i, &id)| i % threads == id));
}

#[test]
fn test_ping_pong_single_notifies() {
    const ROUNDS: u64 = 2_000;
    let state = shared(0u64);

    let echo = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            for _ in 0..ROUNDS {
                let mut lock = state.mutex.lock().unwrap();
                state.cv.wait_pred(&mut lock, |seq| *seq % 2 == 1).unwrap();
                *lock += 1;
                state.cv.notify_one().unwrap();
            }
        })
    };

    for round in 0..ROUNDS {
        let mut lock = state.mutex.lock().unwrap();
        *lock += 1;
        state.cv.notify_one().unwrap();
        let answered = state
            .cv
            .wait_for_pred(&mut lock, Duration::from_secs(10), |seq| *seq % 2 == 0)
            .unwrap();
        assert!(answered, "round {round} stalled");
    }

    echo.join().unwrap();
    assert_eq!(*state.mutex.lock().unwrap(), ROUNDS * 2);
}
