//! Acceptance test modules.
//!
//! Tests that change system state (the wall clock) require root and are
//! marked `#[ignore]`; run them with `cargo test -- --ignored` as root.

mod clock_jump_test;
mod common;
mod handoff_test;
mod timeout_test;
