//! Condition variable with monotonic-clock timed waits.
//!
//! A default `pthread_cond_t` measures `pthread_cond_timedwait` deadlines on
//! `CLOCK_REALTIME`, so stepping the wall clock makes pending timed waits
//! return early or hang. [`MonotonicCondvar`] initializes its condition
//! object with [`CONDVAR_CLOCK`] and computes every deadline on that same
//! clock.
//!
//! All waits may wake spuriously. The `*_pred` forms re-check the predicate
//! under the lock after every wakeup and are the recommended interface.

use crate::mutex::WaitLock;
use monocv_common::error::{check_init, check_operation, SyncError, SyncResult};
use monocv_common::time::{MonotonicTime, TimePoint, WaitStatus, CONDVAR_CLOCK};
use nix::errno::Errno;
use nix::time::ClockId;
use static_assertions::{assert_impl_all, assert_not_impl_any};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ops::DerefMut;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// RAII holder for a condition attribute object.
struct CondAttr<'a>(&'a mut MaybeUninit<libc::pthread_condattr_t>);

impl<'a> CondAttr<'a> {
    fn new(storage: &'a mut MaybeUninit<libc::pthread_condattr_t>) -> SyncResult<Self> {
        // SAFETY: storage is valid for writes; init fully initializes it on success.
        let code = unsafe { libc::pthread_condattr_init(storage.as_mut_ptr()) };
        check_init("pthread_condattr_init", code)?;
        Ok(Self(storage))
    }

    #[cfg(not(target_vendor = "apple"))]
    fn set_clock(&mut self, clock: ClockId) -> SyncResult<()> {
        // SAFETY: the attribute was initialized in `new`.
        let code =
            unsafe { libc::pthread_condattr_setclock(self.0.as_mut_ptr(), clock.as_raw()) };
        check_init("pthread_condattr_setclock", code)
    }

    #[cfg(target_vendor = "apple")]
    fn set_clock(&mut self, _clock: ClockId) -> SyncResult<()> {
        Err(SyncError::Initialization {
            what: "pthread_condattr_setclock",
            errno: Errno::ENOTSUP,
        })
    }

    fn as_ptr(&self) -> *const libc::pthread_condattr_t {
        self.0.as_ptr()
    }
}

impl Drop for CondAttr<'_> {
    fn drop(&mut self) {
        // SAFETY: the attribute was initialized in `new` and is destroyed exactly once.
        unsafe {
            libc::pthread_condattr_destroy(self.0.as_mut_ptr());
        }
    }
}

/// Condition variable whose timed waits are measured on `CLOCK_MONOTONIC`.
///
/// Move-only: the native object lives on the heap so moving the handle never
/// moves the kernel-visible state. Waiters borrow the condition variable, so
/// it cannot be dropped while a thread is blocked on it.
pub struct MonotonicCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: pthread condition variables are designed to be signalled and waited
// on from any thread; all mutation goes through the native primitive.
unsafe impl Send for MonotonicCondvar {}
// SAFETY: as above.
unsafe impl Sync for MonotonicCondvar {}

assert_impl_all!(MonotonicCondvar: Send, Sync);
assert_not_impl_any!(MonotonicCondvar: Clone, Copy);

impl MonotonicCondvar {
    /// Create a condition variable bound to [`CONDVAR_CLOCK`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Initialization`] if the attribute, its clock, or
    /// the condition object cannot be created. The attribute is released on
    /// every path.
    pub fn new() -> SyncResult<Self> {
        let mut storage = MaybeUninit::uninit();
        let mut attr = CondAttr::new(&mut storage)?;
        attr.set_clock(CONDVAR_CLOCK)?;

        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: `inner` is a valid, heap-pinned slot and `attr` is initialized.
        let code = unsafe { libc::pthread_cond_init(inner.get(), attr.as_ptr()) };
        check_init("pthread_cond_init", code)?;

        debug!(clock = ?CONDVAR_CLOCK, "condition variable initialized");
        Ok(Self { inner })
    }

    /// Native condition handle for interop with other pthread primitives.
    ///
    /// Anything done through this pointer is outside the safe contract.
    pub fn native_handle(&self) -> *mut libc::pthread_cond_t {
        self.inner.get()
    }

    /// Wake at most one waiting thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] if `pthread_cond_signal` fails.
    pub fn notify_one(&self) -> SyncResult<()> {
        // SAFETY: the condition object was initialized in `new`.
        let code = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        check_operation("pthread_cond_signal", code)
    }

    /// Wake every waiting thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] if `pthread_cond_broadcast` fails.
    pub fn notify_all(&self) -> SyncResult<()> {
        // SAFETY: the condition object was initialized in `new`.
        let code = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        check_operation("pthread_cond_broadcast", code)
    }

    /// Release `lock`, block until notified, and reacquire `lock`.
    ///
    /// A return does not imply a matching notify; spurious wakeups happen.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] without blocking if the calling
    /// thread does not hold `lock`, or [`SyncError::Operation`] if the native
    /// wait fails.
    pub fn wait<L: WaitLock>(&self, lock: &mut L) -> SyncResult<()> {
        ensure_held(lock)?;
        let mutex = lock.native_handle();
        lock.before_wait();
        // SAFETY: `ensure_held` proved `mutex` is initialized and held by this thread.
        let code = unsafe { libc::pthread_cond_wait(self.inner.get(), mutex) };
        lock.after_wait();
        check_operation("pthread_cond_wait", code)
    }

    /// Wait until `pred` returns `true` for the data guarded by `lock`.
    ///
    /// The predicate is evaluated under the lock before the first wait and
    /// after every wakeup.
    ///
    /// # Errors
    ///
    /// As for [`wait`](Self::wait). The predicate is not called if the lock
    /// is not held.
    pub fn wait_pred<L, F>(&self, lock: &mut L, mut pred: F) -> SyncResult<()>
    where
        L: WaitLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_held(lock)?;
        while !pred(&mut **lock) {
            self.wait(lock)?;
        }
        Ok(())
    }

    /// Wait until notified or until `timeout` has elapsed on the monotonic clock.
    ///
    /// A zero timeout does not block beyond a single check.
    ///
    /// # Errors
    ///
    /// As for [`wait_deadline`](Self::wait_deadline), plus
    /// [`SyncError::Operation`] if the clock cannot be read.
    pub fn wait_for<L: WaitLock>(
        &self,
        lock: &mut L,
        timeout: Duration,
    ) -> SyncResult<WaitStatus> {
        let deadline = MonotonicTime::deadline_after(timeout)?;
        self.wait_deadline(lock, deadline)
    }

    /// Wait until `pred` holds or `timeout` elapses.
    ///
    /// Returns `true` if the predicate became true before the deadline,
    /// otherwise the predicate's value once the deadline has passed.
    ///
    /// # Errors
    ///
    /// As for [`wait_for`](Self::wait_for).
    pub fn wait_for_pred<L, F>(
        &self,
        lock: &mut L,
        timeout: Duration,
        pred: F,
    ) -> SyncResult<bool>
    where
        L: WaitLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_held(lock)?;
        let deadline = MonotonicTime::deadline_after(timeout)?;
        self.wait_deadline_pred(lock, deadline, pred)
    }

    /// Wait until notified or until `target` is reached.
    ///
    /// The time left is measured on `target`'s own clock and re-anchored on
    /// the monotonic clock, so `Instant`, `SystemTime` and [`MonotonicTime`]
    /// targets all behave like relative waits of the remaining duration.
    ///
    /// # Errors
    ///
    /// As for [`wait_for`](Self::wait_for), plus any error reading
    /// `target`'s clock.
    pub fn wait_until<L, P>(&self, lock: &mut L, target: P) -> SyncResult<WaitStatus>
    where
        L: WaitLock,
        P: TimePoint,
    {
        let remaining = target.remaining()?;
        self.wait_for(lock, remaining)
    }

    /// Wait until `pred` holds or `target` is reached.
    ///
    /// # Errors
    ///
    /// As for [`wait_until`](Self::wait_until).
    pub fn wait_until_pred<L, P, F>(&self, lock: &mut L, target: P, pred: F) -> SyncResult<bool>
    where
        L: WaitLock + DerefMut,
        P: TimePoint,
        F: FnMut(&mut L::Target) -> bool,
    {
        ensure_held(lock)?;
        let deadline = MonotonicTime::deadline_after(target.remaining()?)?;
        self.wait_deadline_pred(lock, deadline, pred)
    }

    /// Wait until notified or until the absolute monotonic `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] without blocking if the calling
    /// thread does not hold `lock`, or [`SyncError::Operation`] for any native
    /// result other than success or `ETIMEDOUT`.
    pub fn wait_deadline<L: WaitLock>(
        &self,
        lock: &mut L,
        deadline: MonotonicTime,
    ) -> SyncResult<WaitStatus> {
        ensure_held(lock)?;
        let ts = deadline.to_timespec();
        let mutex = lock.native_handle();
        lock.before_wait();
        // SAFETY: `ensure_held` proved `mutex` is initialized and held by this
        // thread; `ts` outlives the call.
        let code = unsafe { libc::pthread_cond_timedwait(self.inner.get(), mutex, &ts) };
        lock.after_wait();

        let status = match code {
            0 => WaitStatus::Signaled,
            libc::ETIMEDOUT => WaitStatus::TimedOut,
            code => return Err(SyncError::operation("pthread_cond_timedwait", code)),
        };
        trace!(?status, deadline_secs = deadline.secs(), "timed wait returned");
        Ok(status)
    }

    fn wait_deadline_pred<L, F>(
        &self,
        lock: &mut L,
        deadline: MonotonicTime,
        mut pred: F,
    ) -> SyncResult<bool>
    where
        L: WaitLock + DerefMut,
        F: FnMut(&mut L::Target) -> bool,
    {
        while !pred(&mut **lock) {
            if self.wait_deadline(lock, deadline)?.timed_out() {
                return Ok(pred(&mut **lock));
            }
        }
        Ok(true)
    }
}

fn ensure_held<L: WaitLock>(lock: &L) -> SyncResult<()> {
    if lock.is_held_by_current_thread() {
        Ok(())
    } else {
        Err(SyncError::Precondition(
            "condition variable wait requires the lock to be held by the calling thread",
        ))
    }
}

impl Drop for MonotonicCondvar {
    fn drop(&mut self) {
        // SAFETY: waiters borrow `self`, so no thread can be blocked on it here.
        let code = unsafe { libc::pthread_cond_destroy(self.inner.get()) };
        if code != 0 {
            warn!(errno = %Errno::from_raw(code), "pthread_cond_destroy failed");
        }
    }
}

impl fmt::Debug for MonotonicCondvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicCondvar")
            .field("clock", &CONDVAR_CLOCK)
            .finish_non_exhaustive()
    }
}
