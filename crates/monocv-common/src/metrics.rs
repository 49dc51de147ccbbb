//! Wait latency metrics.
//!
//! The probe measures two kinds of latency: how far past its deadline a timed
//! wait returns, and how long a notify takes to reach a waiter. Both are
//! summarized against a budget so the report can flag slow hosts.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Latency samples for one kind of wait.
///
/// Only the first `max_samples` samples are kept for the summary statistics;
/// the sample count and the over-budget count cover every recorded sample.
#[derive(Debug, Clone)]
pub struct WaitMetrics {
    budget: Duration,
    max_samples: usize,
    samples: Vec<Duration>,
    recorded: u64,
    over_budget: u64,
}

impl WaitMetrics {
    /// Create a collector that keeps up to `max_samples` samples and counts
    /// samples strictly longer than `budget`.
    #[must_use]
    pub fn new(max_samples: usize, budget: Duration) -> Self {
        Self {
            budget,
            max_samples,
            samples: Vec::with_capacity(max_samples.min(4096)),
            recorded: 0,
            over_budget: 0,
        }
    }

    /// Record one latency sample.
    pub fn record(&mut self, latency: Duration) {
        self.recorded += 1;
        if latency > self.budget {
            self.over_budget += 1;
        }
        if self.samples.len() < self.max_samples {
            self.samples.push(latency);
        }
    }

    /// Record how late a timed wait returned relative to its own deadline.
    ///
    /// Returns `false` without recording anything if the wait returned before
    /// `deadline`, which a timed-out wait must never do.
    pub fn record_overshoot(&mut self, deadline: Instant, returned: Instant) -> bool {
        if returned < deadline {
            return false;
        }
        self.record(returned - deadline);
        true
    }

    /// Samples recorded, including those not kept.
    #[must_use]
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Samples above the budget.
    #[must_use]
    pub fn over_budget(&self) -> u64 {
        self.over_budget
    }

    /// Summarize the kept samples.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        MetricsSnapshot {
            total: self.recorded,
            min_ns: sorted.first().map(|d| as_nanos(*d)),
            max_ns: sorted.last().map(|d| as_nanos(*d)),
            mean_ns: mean(&sorted).map(as_nanos),
            p50_ns: nearest_rank(&sorted, 50).map(as_nanos),
            p99_ns: nearest_rank(&sorted, 99).map(as_nanos),
            over_budget: self.over_budget,
            budget_ns: as_nanos(self.budget),
        }
    }
}

/// Nearest-rank percentile of an ascending slice.
fn nearest_rank(sorted: &[Duration], percent: usize) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percent * sorted.len()).div_ceil(100).clamp(1, sorted.len());
    Some(sorted[rank - 1])
}

fn mean(samples: &[Duration]) -> Option<Duration> {
    let count = u32::try_from(samples.len()).ok().filter(|&n| n > 0)?;
    Some(samples.iter().sum::<Duration>() / count)
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Serializable summary of a [`WaitMetrics`] collector, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Samples recorded.
    pub total: u64,
    /// Fastest kept sample.
    pub min_ns: Option<u64>,
    /// Slowest kept sample.
    pub max_ns: Option<u64>,
    /// Mean of the kept samples.
    pub mean_ns: Option<u64>,
    /// Median of the kept samples.
    pub p50_ns: Option<u64>,
    /// 99th percentile of the kept samples.
    pub p99_ns: Option<u64>,
    /// Samples above the budget.
    pub over_budget: u64,
    /// The budget.
    pub budget_ns: u64,
}
