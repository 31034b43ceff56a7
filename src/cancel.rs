//! Cooperative cancellation for a conductor run.
//!
//! Worker threads are never killed. The first failure recorded for a run
//! (a worker failure, a timeout, or a deadlock) trips the run's
//! [`CancelToken`]; every worker observes it at its next checkpoint and
//! unwinds out of its body.
//!
//! The first reason wins: later cancel requests are ignored so the reason
//! always names the event that ended the run.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind};

/// Why a run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// A worker failed; its siblings are stopped.
    WorkerFailed {
        /// Name of the failing worker.
        worker: String,
    },
    /// A worker exceeded the run limit.
    Timeout,
    /// The clock manager declared a deadlock.
    Deadlock,
    /// The conductor was dropped before its run completed.
    ConductorDropped,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerFailed { worker } => write!(f, "worker {worker} failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::ConductorDropped => write!(f, "conductor dropped"),
        }
    }
}

/// Shared, one-shot cancellation flag for a run.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    ///
    /// Returns `true` if this call tripped the token, `false` if it was
    /// already cancelled (the original reason is kept).
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        tracing::debug!(%reason, "run cancellation requested");
        *slot = Some(reason);
        self.cancelled.store(true, Ordering::Release);
        true
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns the reason the run was cancelled, if it was.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().clone()
    }

    /// Returns `Err(Cancelled)` if cancellation has been requested.
    #[allow(clippy::result_large_err)]
    pub fn checkpoint(&self) -> Result<(), Error> {
        if !self.is_cancelled() {
            return Ok(());
        }
        let mut err = Error::new(ErrorKind::Cancelled);
        if let Some(reason) = self.reason() {
            err = err.with_message(reason.to_string());
        }
        Err(err)
    }
}
