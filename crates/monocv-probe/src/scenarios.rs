//! Probe scenarios exercising `MonotonicCondvar`.
//!
//! Each scenario builds its own mutex and condition variable, so one
//! scenario's leftover state can never satisfy another's predicate.

use anyhow::{anyhow, Context, Result};
use crossbeam_utils::sync::WaitGroup;
use monocv_common::config::{BroadcastProbeConfig, HandoffProbeConfig, TimeoutProbeConfig};
use monocv_common::metrics::{MetricsSnapshot, WaitMetrics};
use monocv_sync::{MonotonicCondvar, Mutex, WaitStatus};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of the timed-wait accuracy scenario.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutOutcome {
    /// Timed waits performed.
    pub iterations: u32,
    /// Waits that reported `TimedOut` before the timeout had elapsed.
    pub early_returns: u32,
    /// Waits that reported `Signaled` although nobody notified.
    pub spurious_wakeups: u32,
    /// How far past the timeout each wait returned.
    pub overshoot: MetricsSnapshot,
}

/// Result of the two-thread hand-off scenario.
#[derive(Debug, Clone, Serialize)]
pub struct HandoffOutcome {
    /// Round trips completed.
    pub completed_rounds: u32,
    /// Whether a round exceeded its timeout and aborted the scenario.
    pub stalled: bool,
    /// Round-trip latency.
    pub round_trip: MetricsSnapshot,
}

/// Result of the broadcast scenario.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastOutcome {
    /// Waiting threads started.
    pub waiters: usize,
    /// Waiters that observed the broadcast before their timeout.
    pub released: usize,
    /// Latency from `notify_all` to each waiter running again.
    pub wake_latency: MetricsSnapshot,
}

impl BroadcastOutcome {
    /// Waiters that never observed the broadcast.
    #[must_use]
    pub fn lost(&self) -> usize {
        self.waiters - self.released
    }
}

/// Repeatedly wait with nobody notifying and measure when each wait returns.
///
/// # Errors
///
/// Returns an error if a synchronization primitive fails.
pub fn run_timeout(config: &TimeoutProbeConfig, max_samples: usize) -> Result<TimeoutOutcome> {
    let mutex = Mutex::new(()).context("failed to create mutex")?;
    let cv = MonotonicCondvar::new().context("failed to create condition variable")?;
    let mut overshoot = WaitMetrics::new(max_samples, config.max_overshoot);
    let mut early_returns = 0;
    let mut spurious_wakeups = 0;

    info!(
        timeout = %humantime::format_duration(config.wait_timeout),
        iterations = config.iterations,
        "Running timeout scenario"
    );

    for iteration in 0..config.iterations {
        let mut lock = mutex.lock()?;
        let deadline = Instant::now() + config.wait_timeout;
        let status = cv.wait_for(&mut lock, config.wait_timeout)?;
        let returned = Instant::now();

        match status {
            WaitStatus::Signaled => {
                debug!(iteration, "Spurious wakeup");
                spurious_wakeups += 1;
            }
            WaitStatus::TimedOut => {
                if !overshoot.record_overshoot(deadline, returned) {
                    warn!(
                        iteration,
                        early_by = ?deadline - returned,
                        "Timed wait returned before its timeout"
                    );
                    early_returns += 1;
                }
            }
        }
    }

    Ok(TimeoutOutcome {
        iterations: config.iterations,
        early_returns,
        spurious_wakeups,
        overshoot: overshoot.snapshot(),
    })
}

#[derive(Debug, Default)]
struct Baton {
    /// Odd while the echo thread holds the turn.
    seq: u64,
    stop: bool,
}

/// Ping-pong a sequence number between two threads.
///
/// # Errors
///
/// Returns an error if a synchronization primitive fails or the echo thread panics.
pub fn run_handoff(config: &HandoffProbeConfig, max_samples: usize) -> Result<HandoffOutcome> {
    let mutex = Mutex::new(Baton::default()).context("failed to create mutex")?;
    let cv = MonotonicCondvar::new().context("failed to create condition variable")?;
    let mut round_trip = WaitMetrics::new(max_samples, config.round_timeout);
    let mut completed_rounds = 0;
    let mut stalled = false;

    info!(rounds = config.rounds, "Running hand-off scenario");

    thread::scope(|scope| -> Result<()> {
        let echo = scope.spawn(|| -> Result<()> {
            loop {
                let mut lock = mutex.lock()?;
                cv.wait_pred(&mut lock, |baton| baton.stop || baton.seq % 2 == 1)?;
                if lock.stop {
                    return Ok(());
                }
                lock.seq += 1;
                cv.notify_one()?;
            }
        });

        let driven = drive_rounds(&mutex, &cv, config, &mut round_trip);

        // Always release the echo thread, even if driving failed.
        let stop = mutex.lock().map(|mut lock| lock.stop = true);
        cv.notify_all()?;
        stop?;

        let echo_result = echo
            .join()
            .map_err(|_| anyhow!("hand-off echo thread panicked"))?;
        (completed_rounds, stalled) = driven?;
        echo_result
    })?;

    Ok(HandoffOutcome {
        completed_rounds,
        stalled,
        round_trip: round_trip.snapshot(),
    })
}

fn drive_rounds(
    mutex: &Mutex<Baton>,
    cv: &MonotonicCondvar,
    config: &HandoffProbeConfig,
    round_trip: &mut WaitMetrics,
) -> Result<(u32, bool)> {
    for round in 0..config.rounds {
        let start = Instant::now();
        let mut lock = mutex.lock()?;
        lock.seq += 1;
        let answer = lock.seq + 1;
        cv.notify_one()?;

        let answered =
            cv.wait_for_pred(&mut lock, config.round_timeout, |baton| baton.seq >= answer)?;
        drop(lock);

        if !answered {
            warn!(round, timeout = ?config.round_timeout, "Hand-off round stalled");
            return Ok((round, true));
        }
        round_trip.record(start.elapsed());
    }
    Ok((config.rounds, false))
}

#[derive(Debug, Default)]
struct Gate {
    opened_at: Option<Instant>,
}

/// Release a group of waiters with a single `notify_all`.
///
/// # Errors
///
/// Returns an error if a synchronization primitive fails or a waiter panics.
pub fn run_broadcast(
    config: &BroadcastProbeConfig,
    max_samples: usize,
) -> Result<BroadcastOutcome> {
    let mutex = Mutex::new(Gate::default()).context("failed to create mutex")?;
    let cv = MonotonicCondvar::new().context("failed to create condition variable")?;
    let mut wake_latency = WaitMetrics::new(max_samples, config.wake_budget);

    info!(waiters = config.waiters, "Running broadcast scenario");

    let results = thread::scope(|scope| -> Result<Vec<Option<Duration>>> {
        let started = WaitGroup::new();
        let handles: Vec<_> = (0..config.waiters)
            .map(|_| {
                let started = started.clone();
                let (mutex, cv) = (&mutex, &cv);
                scope.spawn(move || -> Result<Option<Duration>> {
                    let mut lock = mutex.lock()?;
                    drop(started);
                    let opened = cv.wait_for_pred(&mut lock, config.wait_timeout, |gate| {
                        gate.opened_at.is_some()
                    })?;
                    Ok(lock.opened_at.filter(|_| opened).map(|at| at.elapsed()))
                })
            })
            .collect();

        // Every waiter has taken the lock at least once; taking it here means
        // each has either reached the condition variable or not started waiting.
        started.wait();
        mutex.lock()?.opened_at = Some(Instant::now());
        cv.notify_all()?;

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| anyhow!("broadcast waiter panicked"))?
            })
            .collect()
    })?;

    let mut released = 0;
    for latency in results.into_iter().flatten() {
        released += 1;
        wake_latency.record(latency);
    }

    Ok(BroadcastOutcome {
        waiters: config.waiters,
        released,
        wake_latency: wake_latency.snapshot(),
    })
}
