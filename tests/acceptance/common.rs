//! Common utilities for acceptance tests.

#![allow(dead_code)]

use monocv_sync::{MonotonicCondvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Check if running as root (required to set the wall clock).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Get the number of CPUs.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Mutex and condition variable shared between test threads.
pub struct Shared<T> {
    pub mutex: Mutex<T>,
    pub cv: MonotonicCondvar,
}

pub fn shared<T>(value: T) -> Arc<Shared<T>> {
    Arc::new(Shared {
        mutex: Mutex::new(value).unwrap(),
        cv: MonotonicCondvar::new().unwrap(),
    })
}

/// Min/max/mean of a set of durations.
#[derive(Debug, Clone, Copy)]
pub struct Spread {
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
}

pub fn spread(samples: &[Duration]) -> Spread {
    assert!(!samples.is_empty(), "no samples");
    let total: Duration = samples.iter().sum();
    Spread {
        min: *samples.iter().min().unwrap(),
        max: *samples.iter().max().unwrap(),
        mean: total / u32::try_from(samples.len()).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread() {
        let s = spread(&[
            Duration::from_millis(3),
            Duration::from_millis(1),
            Duration::from_millis(2),
        ]);
        assert_eq!(s.min, Duration::from_millis(1));
        assert_eq!(s.max, Duration::from_millis(3));
        assert_eq!(s.mean, Duration::from_millis(2));
    }

    #[test]
    fn test_num_cpus_nonzero() {
        assert!(num_cpus() >= 1);
    }
}
