//! Monotonic time points and deadline arithmetic.
//!
//! Every timed wait in the workspace measures against [`CONDVAR_CLOCK`].
//! The condition variable is initialized with this clock and every
//! deadline is read from it, so the two can never disagree.

use crate::error::{SyncError, SyncResult};
use nix::time::{clock_gettime, ClockId};
use std::time::{Duration, Instant, SystemTime};

/// Clock used both for the condition attribute and for deadline reads.
pub const CONDVAR_CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Outcome of a timed wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// The thread woke before the deadline. The wakeup may be spurious.
    Signaled,
    /// The deadline passed without a wakeup.
    TimedOut,
}

impl WaitStatus {
    /// Returns `true` if the wait ended because the deadline passed.
    #[must_use]
    pub fn timed_out(self) -> bool {
        self == Self::TimedOut
    }
}

/// Point in time on [`CONDVAR_CLOCK`].
///
/// `nanos` is always in `[0, NANOS_PER_SEC)`. [`MonotonicTime::ZERO`] doubles
/// as the "do not block" deadline: it lies in the past for any running system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonotonicTime {
    secs: i64,
    nanos: u32,
}

impl MonotonicTime {
    /// The zero instant, used as the already-elapsed deadline.
    pub const ZERO: Self = Self { secs: 0, nanos: 0 };

    /// Build a time point, folding excess nanoseconds into seconds.
    #[must_use]
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs.saturating_add(i64::from(nanos / NANOS_PER_SEC)),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    /// Read the current time from [`CONDVAR_CLOCK`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] if `clock_gettime` fails.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn now() -> SyncResult<Self> {
        let ts = clock_gettime(CONDVAR_CLOCK).map_err(|errno| SyncError::Operation {
            what: "clock_gettime",
            errno,
        })?;
        Ok(Self::new(i64::from(ts.tv_sec()), ts.tv_nsec() as u32))
    }

    /// Absolute deadline `d` after `now`.
    ///
    /// A zero duration yields [`MonotonicTime::ZERO`]. Seconds saturate
    /// instead of overflowing, so `Duration::MAX` means "effectively never".
    #[must_use]
    pub fn deadline_from(now: Self, d: Duration) -> Self {
        if d.is_zero() {
            return Self::ZERO;
        }

        let whole_secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
        let mut secs = now.secs.saturating_add(whole_secs);
        let mut nanos = now.nanos + d.subsec_nanos();
        if nanos >= NANOS_PER_SEC {
            nanos -= NANOS_PER_SEC;
            secs = secs.saturating_add(1);
        }

        Self { secs, nanos }
    }

    /// Absolute deadline `d` from the current monotonic time.
    ///
    /// The clock is not read when `d` is zero.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] if the clock cannot be read.
    pub fn deadline_after(d: Duration) -> SyncResult<Self> {
        if d.is_zero() {
            return Ok(Self::ZERO);
        }
        Ok(Self::deadline_from(Self::now()?, d))
    }

    /// Whole seconds component.
    #[must_use]
    pub fn secs(self) -> i64 {
        self.secs
    }

    /// Sub-second nanoseconds component, always below [`NANOS_PER_SEC`].
    #[must_use]
    pub fn nanos(self) -> u32 {
        self.nanos
    }

    /// Whether this is the zero sentinel.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        if self <= earlier {
            return Duration::ZERO;
        }
        // Spans wider than i64::MAX seconds still fit in u64.
        let secs = self.secs.abs_diff(earlier.secs);
        if self.nanos >= earlier.nanos {
            Duration::new(secs, self.nanos - earlier.nanos)
        } else {
            Duration::new(secs - 1, self.nanos + NANOS_PER_SEC - earlier.nanos)
        }
    }

    /// Convert into the `timespec` expected by `pthread_cond_timedwait`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn to_timespec(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.secs as libc::time_t,
            tv_nsec: self.nanos as libc::c_long,
        }
    }
}

/// A target time on some clock that can report how long remains until it.
///
/// Absolute waits measure the remaining time on the caller's clock and
/// re-anchor it on [`CONDVAR_CLOCK`]. If the caller's clock drifts against
/// the monotonic clock during a long wait, the deadline drifts with it.
pub trait TimePoint {
    /// Time left until this point, or zero if it has already passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying clock cannot be read.
    fn remaining(&self) -> SyncResult<Duration>;
}

impl TimePoint for Instant {
    fn remaining(&self) -> SyncResult<Duration> {
        Ok(self.saturating_duration_since(Instant::now()))
    }
}

impl TimePoint for SystemTime {
    fn remaining(&self) -> SyncResult<Duration> {
        Ok(self
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO))
    }
}

impl TimePoint for MonotonicTime {
    fn remaining(&self) -> SyncResult<Duration> {
        Ok(self.saturating_duration_since(Self::now()?))
    }
}
