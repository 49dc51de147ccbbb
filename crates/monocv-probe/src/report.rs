//! Probe report assembly and formatting.
//!
//! Collects scenario outcomes into a single report with an overall verdict,
//! rendered either as a human-readable summary or as JSON.

use crate::scenarios::{BroadcastOutcome, HandoffOutcome, TimeoutOutcome};
use monocv_common::metrics::MetricsSnapshot;
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::time::Duration;

/// Overall probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Every scenario behaved as expected.
    Pass,
    /// Correct, but timed waits overshot their budget.
    Degraded,
    /// A wait returned early, a waiter was lost, or a hand-off stalled.
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Degraded => write!(f, "degraded"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Results of one probe run. Disabled scenarios are `None`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Probe version.
    pub version: &'static str,
    /// Overall verdict across all scenarios that ran.
    pub verdict: Verdict,
    /// Timed-wait accuracy results.
    pub timeout: Option<TimeoutOutcome>,
    /// Hand-off results.
    pub handoff: Option<HandoffOutcome>,
    /// Broadcast results.
    pub broadcast: Option<BroadcastOutcome>,
}

impl ProbeReport {
    /// Build a report and derive its verdict.
    #[must_use]
    pub fn new(
        timeout: Option<TimeoutOutcome>,
        handoff: Option<HandoffOutcome>,
        broadcast: Option<BroadcastOutcome>,
    ) -> Self {
        let mut verdict = Verdict::Pass;

        if let Some(t) = &timeout {
            if t.early_returns > 0 {
                verdict = verdict.max(Verdict::Fail);
            } else if t.overshoot.over_budget > 0 {
                verdict = verdict.max(Verdict::Degraded);
            }
        }
        if handoff.as_ref().is_some_and(|h| h.stalled) {
            verdict = Verdict::Fail;
        }
        if broadcast.as_ref().is_some_and(|b| b.lost() > 0) {
            verdict = Verdict::Fail;
        }

        Self {
            version: env!("CARGO_PKG_VERSION"),
            verdict,
            timeout,
            handoff,
            broadcast,
        }
    }

    /// Whether the probe should exit with a failure status.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.verdict == Verdict::Fail
    }

    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render as a human-readable summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "monocv-probe {}", self.version);

        if let Some(t) = &self.timeout {
            let _ = writeln!(out, "\n[timeout]");
            let _ = writeln!(out, "  waits            {}", t.iterations);
            let _ = writeln!(out, "  early returns    {}", t.early_returns);
            let _ = writeln!(out, "  spurious wakeups {}", t.spurious_wakeups);
            write_latency(&mut out, "overshoot", &t.overshoot);
        }

        if let Some(h) = &self.handoff {
            let _ = writeln!(out, "\n[handoff]");
            let _ = writeln!(out, "  rounds           {}", h.completed_rounds);
            let _ = writeln!(out, "  stalled          {}", h.stalled);
            write_latency(&mut out, "round trip", &h.round_trip);
        }

        if let Some(b) = &self.broadcast {
            let _ = writeln!(out, "\n[broadcast]");
            let _ = writeln!(out, "  waiters          {}", b.waiters);
            let _ = writeln!(out, "  released         {}", b.released);
            let _ = writeln!(out, "  lost             {}", b.lost());
            write_latency(&mut out, "wake latency", &b.wake_latency);
        }

        let _ = writeln!(out, "\nverdict: {}", self.verdict);
        out
    }
}

fn write_latency(out: &mut String, label: &str, snap: &MetricsSnapshot) {
    let show = |ns: Option<u64>| {
        ns.map_or_else(
            || "-".to_string(),
            |ns| format!("{:?}", Duration::from_nanos(ns)),
        )
    };
    let _ = writeln!(
        out,
        "  {label:<16} min {} / p50 {} / p99 {} / max {} ({} over {:?})",
        show(snap.min_ns),
        show(snap.p50_ns),
        show(snap.p99_ns),
        show(snap.max_ns),
        snap.over_budget,
        Duration::from_nanos(snap.budget_ns),
    );
}
