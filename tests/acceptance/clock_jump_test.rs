//! Wall-clock jump acceptance tests.
//!
//! Timed waits are measured on the monotonic clock, so stepping
//! `CLOCK_REALTIME` while a thread waits must neither cut the wait short
//! nor stretch it out.
//!
//! # Requirements
//!
//! - Root privileges (`clock_settime(CLOCK_REALTIME)`)
//! - No NTP daemon stepping the clock during the run

#![cfg(target_os = "linux")]

use super::common::{is_root, shared};
use monocv_sync::WaitStatus;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, clock_settime, ClockId};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_millis(500);
const JUMP: Duration = Duration::from_secs(3_600);

/// Steps the wall clock and restores it on drop.
struct ClockJump {
    offset: TimeSpec,
    forward: bool,
    started: Instant,
}

impl ClockJump {
    fn step(offset: Duration, forward: bool) -> Self {
        let offset = TimeSpec::from_duration(offset);
        let now = clock_gettime(ClockId::CLOCK_REALTIME).unwrap();
        let target = if forward { now + offset } else { now - offset };
        clock_settime(ClockId::CLOCK_REALTIME, target).unwrap();
        Self {
            offset,
            forward,
            started: Instant::now(),
        }
    }
}

impl Drop for ClockJump {
    fn drop(&mut self) {
        // Undo the step, keeping the time that passed meanwhile.
        let now = clock_gettime(ClockId::CLOCK_REALTIME).unwrap();
        let restored = if self.forward {
            now - self.offset
        } else {
            now + self.offset
        };
        clock_settime(ClockId::CLOCK_REALTIME, restored).unwrap();
        println!("wall clock restored after {:?}", self.started.elapsed());
    }
}

fn timed_wait_across_jump(forward: bool) -> (WaitStatus, Duration) {
    let state = shared(());

    let waiter = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            let mut lock = state.mutex.lock().unwrap();
            let start = Instant::now();
            let mut status = WaitStatus::Signaled;
            while status == WaitStatus::Signaled && start.elapsed() < WAIT {
                status = state.cv.wait_for(&mut lock, WAIT - start.elapsed()).unwrap();
            }
            (status, start.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(100));
    let jump = ClockJump::step(JUMP, forward);
    let result = waiter.join().unwrap();
    drop(jump);
    result
}

#[test]
#[ignore = "Requires root"]
fn test_forward_jump_does_not_shorten_wait() {
    if !is_root() {
        eprintln!("Skipping test: not running as root");
        return;
    }

    let (_, took) = timed_wait_across_jump(true);
    assert!(took >= WAIT, "wait cut short to {took:?} by a forward jump");
}

#[test]
#[ignore = "Requires root"]
fn test_backward_jump_does_not_stretch_wait() {
    if !is_root() {
        eprintln!("Skipping test: not running as root");
        return;
    }

    let (status, took) = timed_wait_across_jump(false);
    assert_eq!(status, WaitStatus::TimedOut);
    assert!(took >= WAIT);
    assert!(took < WAIT * 10, "wait stretched to {took:?} by a backward jump");
}
