#![doc = "Monotonic-clock condition variable and the pthread mutex it waits with."]

pub mod condvar;
pub mod mutex;

pub use condvar::*;
pub use monocv_common::error::{SyncError, SyncResult};
pub use monocv_common::time::{MonotonicTime, TimePoint, WaitStatus};
pub use mutex::*;
