//! Error-checking pthread mutex and its owning guard.
//!
//! [`MonotonicCondvar`](crate::condvar::MonotonicCondvar) needs the native
//! mutex handle behind the caller's lock, which `std::sync::Mutex` does not
//! expose. [`Mutex`] wraps a `PTHREAD_MUTEX_ERRORCHECK` mutex together with
//! the data it protects, and [`UniqueLock`] is its guard:
//!
//! - a guard may be created without locking ([`Mutex::deferred`]) and may
//!   unlock and relock during its lifetime;
//! - the mutex records which thread holds it, so a wait can verify that the
//!   calling thread really owns the lock before touching the native primitive;
//! - relocking from the owning thread reports `EDEADLK` instead of hanging.

use monocv_common::error::{check_init, check_operation, SyncError, SyncResult};
use nix::errno::Errno;
use static_assertions::{assert_impl_all, assert_not_impl_any};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Owner value meaning "not held by any thread".
const NO_OWNER: u64 = 0;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique, never-zero identifier of the calling thread.
fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// A lock the condition variable can wait on.
///
/// # Safety
///
/// When [`is_held_by_current_thread`](WaitLock::is_held_by_current_thread)
/// returns `true`, [`native_handle`](WaitLock::native_handle) must point to an
/// initialized `pthread_mutex_t` that the calling thread has locked and that
/// stays alive for the duration of the borrow.
pub unsafe trait WaitLock {
    /// Whether the calling thread currently holds this lock.
    fn is_held_by_current_thread(&self) -> bool;

    /// Native mutex handed to `pthread_cond_wait`.
    fn native_handle(&self) -> *mut libc::pthread_mutex_t;

    /// Called right before the native wait releases the mutex.
    fn before_wait(&mut self);

    /// Called once the native wait has reacquired the mutex.
    fn after_wait(&mut self);
}

/// RAII holder for a mutex attribute object.
struct MutexAttr<'a>(&'a mut MaybeUninit<libc::pthread_mutexattr_t>);

impl<'a> MutexAttr<'a> {
    fn new(storage: &'a mut MaybeUninit<libc::pthread_mutexattr_t>) -> SyncResult<Self> {
        // SAFETY: storage is valid for writes; init fully initializes it on success.
        let code = unsafe { libc::pthread_mutexattr_init(storage.as_mut_ptr()) };
        check_init("pthread_mutexattr_init", code)?;
        Ok(Self(storage))
    }

    fn set_errorcheck(&mut self) -> SyncResult<()> {
        // SAFETY: the attribute was initialized in `new`.
        let code = unsafe {
            libc::pthread_mutexattr_settype(self.0.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK)
        };
        check_init("pthread_mutexattr_settype", code)
    }

    fn as_ptr(&self) -> *const libc::pthread_mutexattr_t {
        self.0.as_ptr()
    }
}

impl Drop for MutexAttr<'_> {
    fn drop(&mut self) {
        // SAFETY: the attribute was initialized in `new` and is destroyed exactly once.
        unsafe {
            libc::pthread_mutexattr_destroy(self.0.as_mut_ptr());
        }
    }
}

/// Mutual exclusion lock backed by an error-checking `pthread_mutex_t`.
pub struct Mutex<T> {
    /// Boxed so the native object never moves once initialized.
    raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
    /// Token of the thread holding the mutex, or `NO_OWNER`.
    owner: AtomicU64,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the native mutex.
unsafe impl<T: Send> Send for Mutex<T> {}
// SAFETY: as above; the native mutex is designed for cross-thread use.
unsafe impl<T: Send> Sync for Mutex<T> {}

assert_impl_all!(Mutex<u64>: Send, Sync);

impl<T> Mutex<T> {
    /// Create a new unlocked mutex protecting `value`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Initialization`] if the mutex or its attribute
    /// cannot be created.
    pub fn new(value: T) -> SyncResult<Self> {
        let mut storage = MaybeUninit::uninit();
        let mut attr = MutexAttr::new(&mut storage)?;
        attr.set_errorcheck()?;

        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        // SAFETY: `raw` is a valid, heap-pinned mutex slot and `attr` is initialized.
        let code = unsafe { libc::pthread_mutex_init(raw.get(), attr.as_ptr()) };
        check_init("pthread_mutex_init", code)?;

        Ok(Self {
            raw,
            owner: AtomicU64::new(NO_OWNER),
            data: UnsafeCell::new(value),
        })
    }

    /// Block until the mutex is acquired and return an owning guard.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] with `EDEADLK` if the calling thread
    /// already holds the mutex.
    pub fn lock(&self) -> SyncResult<UniqueLock<'_, T>> {
        let mut guard = self.deferred();
        guard.lock()?;
        Ok(guard)
    }

    /// Acquire the mutex if it is free.
    ///
    /// Returns `Ok(None)` when another guard holds it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Operation`] for native errors other than `EBUSY`.
    pub fn try_lock(&self) -> SyncResult<Option<UniqueLock<'_, T>>> {
        // SAFETY: the mutex was initialized in `new` and lives as long as `self`.
        let code = unsafe { libc::pthread_mutex_trylock(self.raw.get()) };
        match code {
            0 => {
                self.owner.store(current_thread_token(), Ordering::Relaxed);
                Ok(Some(UniqueLock::new(self, true)))
            }
            libc::EBUSY => Ok(None),
            code => Err(SyncError::operation("pthread_mutex_trylock", code)),
        }
    }

    /// Create a guard that does not lock the mutex yet.
    pub fn deferred(&self) -> UniqueLock<'_, T> {
        UniqueLock::new(self, false)
    }

    /// Consume the mutex and return the protected data.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped or used again, so each field is
        // moved out exactly once.
        let (raw, data) = unsafe { (ptr::read(&this.raw), ptr::read(&this.data)) };
        destroy_native(&raw);
        data.into_inner()
    }

    /// Mutable access to the data without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Native mutex handle for interop with other pthread primitives.
    pub fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }

    fn raw_lock(&self) -> SyncResult<()> {
        // SAFETY: the mutex was initialized in `new` and lives as long as `self`.
        let code = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
        check_operation("pthread_mutex_lock", code)?;
        self.owner.store(current_thread_token(), Ordering::Relaxed);
        Ok(())
    }

    fn raw_unlock(&self) -> SyncResult<()> {
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        // SAFETY: only called by a guard that owns the mutex on this thread.
        let code = unsafe { libc::pthread_mutex_unlock(self.raw.get()) };
        check_operation("pthread_mutex_unlock", code)
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        destroy_native(&self.raw);
    }
}

/// Destroy an unlocked native mutex. Guards borrow the mutex, so callers
/// with the mutex by value or `&mut` know no guard is alive.
fn destroy_native(raw: &UnsafeCell<libc::pthread_mutex_t>) {
    // SAFETY: the mutex was initialized in `new` and is destroyed exactly once.
    let code = unsafe { libc::pthread_mutex_destroy(raw.get()) };
    if code != 0 {
        warn!(errno = %Errno::from_raw(code), "pthread_mutex_destroy failed");
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &(self.owner.load(Ordering::Relaxed) != NO_OWNER))
            .finish_non_exhaustive()
    }
}

/// Guard for a [`Mutex`] that may or may not currently own it.
///
/// Unlocks on drop if it owns the mutex. The guard is `!Send` because a
/// pthread mutex must be unlocked by the thread that locked it.
#[must_use = "if unused the mutex is unlocked immediately"]
pub struct UniqueLock<'a, T> {
    mutex: &'a Mutex<T>,
    owns: bool,
    _not_send: PhantomData<*const ()>,
}

assert_not_impl_any!(UniqueLock<'static, u64>: Send);

impl<'a, T> UniqueLock<'a, T> {
    fn new(mutex: &'a Mutex<T>, owns: bool) -> Self {
        Self {
            mutex,
            owns,
            _not_send: PhantomData,
        }
    }

    /// Whether this guard holds the mutex on the calling thread.
    pub fn owns_lock(&self) -> bool {
        self.owns && self.mutex.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    /// Acquire the mutex through this guard.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] if the guard already owns the mutex,
    /// or [`SyncError::Operation`] if the native lock fails.
    pub fn lock(&mut self) -> SyncResult<()> {
        if self.owns {
            return Err(SyncError::Precondition("unique lock already owns its mutex"));
        }
        self.mutex.raw_lock()?;
        self.owns = true;
        Ok(())
    }

    /// Release the mutex while keeping the guard.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] if the guard does not own the mutex,
    /// or [`SyncError::Operation`] if the native unlock fails.
    pub fn unlock(&mut self) -> SyncResult<()> {
        if !self.owns {
            return Err(SyncError::Precondition("unique lock does not own its mutex"));
        }
        self.owns = false;
        self.mutex.raw_unlock()
    }

    /// The mutex this guard refers to.
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    /// Shared access to the data without the panic `Deref` raises.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] if the guard does not own the mutex.
    pub fn try_get(&self) -> SyncResult<&T> {
        if !self.owns {
            return Err(SyncError::Precondition("unique lock does not own its mutex"));
        }
        // SAFETY: owning the mutex grants exclusive access to the data.
        Ok(unsafe { &*self.mutex.data.get() })
    }

    /// Exclusive access to the data without the panic `DerefMut` raises.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Precondition`] if the guard does not own the mutex.
    pub fn try_get_mut(&mut self) -> SyncResult<&mut T> {
        if !self.owns {
            return Err(SyncError::Precondition("unique lock does not own its mutex"));
        }
        // SAFETY: owning the mutex grants exclusive access to the data.
        Ok(unsafe { &mut *self.mutex.data.get() })
    }
}

impl<T> Deref for UniqueLock<'_, T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the guard does not own the mutex.
    fn deref(&self) -> &T {
        assert!(self.owns, "UniqueLock accessed without owning its mutex");
        // SAFETY: owning the mutex grants exclusive access to the data.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for UniqueLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        assert!(self.owns, "UniqueLock accessed without owning its mutex");
        // SAFETY: owning the mutex grants exclusive access to the data.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for UniqueLock<'_, T> {
    fn drop(&mut self) {
        if self.owns {
            if let Err(e) = self.mutex.raw_unlock() {
                warn!(error = %e, "failed to release mutex on guard drop");
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for UniqueLock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("UniqueLock");
        s.field("owns", &self.owns);
        if self.owns {
            s.field("data", &**self);
        }
        s.finish()
    }
}

// SAFETY: `owns_lock` is true only while this thread holds the initialized
// native mutex, which outlives the guard's borrow.
unsafe impl<T> WaitLock for UniqueLock<'_, T> {
    fn is_held_by_current_thread(&self) -> bool {
        self.owns_lock()
    }

    fn native_handle(&self) -> *mut libc::pthread_mutex_t {
        self.mutex.native_handle()
    }

    fn before_wait(&mut self) {
        self.mutex.owner.store(NO_OWNER, Ordering::Relaxed);
    }

    fn after_wait(&mut self) {
        self.mutex
            .owner
            .store(current_thread_token(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_and_mutate() {
        let mutex = Mutex::new(1u32).unwrap();
        {
            let mut guard = mutex.lock().unwrap();
            assert!(guard.owns_lock());
            *guard += 1;
        }
        assert_eq!(*mutex.lock().unwrap(), 2);
    }

    #[test]
    fn test_deferred_guard_does_not_own() {
        let mutex = Mutex::new(()).unwrap();
        let mut guard = mutex.deferred();
        assert!(!guard.owns_lock());
        assert!(!guard.is_held_by_current_thread());

        guard.lock().unwrap();
        assert!(guard.owns_lock());
        guard.unlock().unwrap();
        assert!(!guard.owns_lock());
    }

    #[test]
    fn test_guard_misuse_is_precondition_error() {
        let mutex = Mutex::new(()).unwrap();
        let mut guard = mutex.deferred();
        assert!(guard.unlock().unwrap_err().is_precondition());

        guard.lock().unwrap();
        assert!(guard.lock().unwrap_err().is_precondition());
    }

    #[test]
    fn test_relock_on_same_thread_reports_deadlock() {
        let mutex = Mutex::new(()).unwrap();
        let _held = mutex.lock().unwrap();

        let err = mutex.lock().unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EDEADLK));
    }

    #[test]
    fn test_try_lock_busy_from_other_thread() {
        let mutex = Arc::new(Mutex::new(0u8).unwrap());
        let _held = mutex.lock().unwrap();

        let other = Arc::clone(&mutex);
        let busy = thread::spawn(move || other.try_lock().unwrap().is_none())
            .join()
            .unwrap();
        assert!(busy);
    }

    #[test]
    fn test_try_lock_free() {
        let mutex = Mutex::new(5u8).unwrap();
        let guard = mutex.try_lock().unwrap().expect("mutex should be free");
        assert_eq!(*guard, 5);
    }

    #[test]
    fn test_owner_is_per_thread() {
        let mutex = Arc::new(Mutex::new(()).unwrap());
        let held = mutex.lock().unwrap();
        assert!(held.owns_lock());

        let other = Arc::clone(&mutex);
        let (held_elsewhere, debug) = thread::spawn(move || {
            let guard = other.deferred();
            let held_here = guard.is_held_by_current_thread();
            let busy = other.try_lock().unwrap().is_none();
            (!held_here && busy, format!("{other:?}"))
        })
        .join()
        .unwrap();
        assert!(held_elsewhere);
        assert!(debug.contains("locked: true"));
        assert!(held.owns_lock());
    }

    #[test]
    fn test_counter_across_threads() {
        let mutex = Arc::new(Mutex::new(0u64).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        *mutex.lock().unwrap() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock().unwrap(), 4_000);
    }

    #[test]
    fn test_get_mut_and_native_handle() {
        let mut mutex = Mutex::new(vec![1, 2]).unwrap();
        mutex.get_mut().push(3);
        assert_eq!(mutex.lock().unwrap().len(), 3);
        assert!(!mutex.native_handle().is_null());
    }

    #[test]
    fn test_into_inner() {
        let mutex = Mutex::new(String::from("held")).unwrap();
        mutex.lock().unwrap().push_str(" data");
        assert_eq!(mutex.into_inner(), "held data");
    }

    #[test]
    #[should_panic(expected = "without owning")]
    fn test_deref_without_owning_panics() {
        let mutex = Mutex::new(0u8).unwrap();
        let guard = mutex.deferred();
        assert_eq!(*guard, 0);
    }

    #[test]
    fn test_checked_access_requires_ownership() {
        let mutex = Mutex::new(1u32).unwrap();
        let mut guard = mutex.deferred();
        assert!(guard.try_get().unwrap_err().is_precondition());
        assert!(guard.try_get_mut().unwrap_err().is_precondition());

        guard.lock().unwrap();
        *guard.try_get_mut().unwrap() += 41;
        assert_eq!(*guard.try_get().unwrap(), 42);

        guard.unlock().unwrap();
        assert!(guard.try_get_mut().is_err());
        drop(guard);
        assert_eq!(*mutex.lock().unwrap(), 42);
    }
}
