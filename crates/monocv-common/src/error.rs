use nix::errno::Errno;
use thiserror::Error;

/// Synchronization error types covering initialization, lock misuse, and native failures.
///
/// Timeouts are not errors: timed waits report them through
/// [`WaitStatus::TimedOut`](crate::time::WaitStatus::TimedOut).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// A native primitive or one of its attributes could not be created.
    #[error("initialization error: {what} failed: {errno}")]
    Initialization {
        /// Native call that failed.
        what: &'static str,
        /// Error code reported by the call.
        errno: Errno,
    },

    /// A lock was used in a state its contract forbids, e.g. waiting without holding it.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// Unexpected error code from a notify, wait, or lock operation.
    #[error("operation error: {what} failed: {errno}")]
    Operation {
        /// Native call that failed.
        what: &'static str,
        /// Error code reported by the call.
        errno: Errno,
    },
}

impl SyncError {
    /// Build an [`SyncError::Initialization`] from a raw pthread return code.
    #[must_use]
    pub fn init(what: &'static str, code: i32) -> Self {
        Self::Initialization {
            what,
            errno: Errno::from_raw(code),
        }
    }

    /// Build an [`SyncError::Operation`] from a raw pthread return code.
    #[must_use]
    pub fn operation(what: &'static str, code: i32) -> Self {
        Self::Operation {
            what,
            errno: Errno::from_raw(code),
        }
    }

    /// Native error code carried by this error, if any.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Initialization { errno, .. } | Self::Operation { errno, .. } => Some(*errno),
            Self::Precondition(_) => None,
        }
    }

    /// Whether this error reports caller misuse rather than an environment fault.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}

/// Convenience type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Map a pthread-style return code (zero on success) into a [`SyncResult`].
///
/// # Errors
///
/// Returns [`SyncError::Operation`] for any non-zero code.
pub fn check_operation(what: &'static str, code: i32) -> SyncResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(SyncError::operation(what, code))
    }
}

/// Map a pthread-style return code from an init routine into a [`SyncResult`].
///
/// # Errors
///
/// Returns [`SyncError::Initialization`] for any non-zero code.
pub fn check_init(what: &'static str, code: i32) -> SyncResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(SyncError::init(what, code))
    }
}
