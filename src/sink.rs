//! Bounded collection of the failures raised during a run.
//!
//! Any worker and the clock manager may offer failures concurrently; only
//! the first `capacity` are kept, in insertion order. Offers never block on
//! capacity and never fail: once full, further failures are counted and
//! dropped.
//!
//! The conductor closes the sink when a run's outcome is decided. Offers
//! after that, from workers detached past the cancel grace, are ignored so
//! `errors()` never changes after `execute` returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::Error;

/// Default number of failures retained per run.
pub const DEFAULT_ERROR_CAPACITY: usize = 20;

/// Thread-safe, append-only, capacity-bounded failure log.
#[derive(Debug)]
pub struct ErrorSink {
    capacity: usize,
    errors: Mutex<Vec<Error>>,
    dropped: AtomicUsize,
    closed: AtomicBool,
}

impl ErrorSink {
    /// Creates a sink that keeps at most `capacity` failures.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            errors: Mutex::new(Vec::with_capacity(capacity)),
            dropped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Records a failure if there is room.
    ///
    /// Returns `true` if the failure was kept.
    pub fn offer(&self, error: Error) -> bool {
        let mut errors = self.errors.lock();
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(%error, "error sink closed; late failure ignored");
            return false;
        }
        if errors.len() < self.capacity {
            tracing::debug!(%error, position = errors.len(), "failure recorded");
            errors.push(error);
            return true;
        }
        drop(errors);
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%error, capacity = self.capacity, "error sink full; failure dropped");
        false
    }

    /// Stops accepting failures. Later offers are ignored and not counted
    /// as dropped.
    pub fn close(&self) {
        let _errors = self.errors.lock();
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once the sink has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the recorded failures in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Error> {
        self.errors.lock().clone()
    }

    /// Returns the first recorded failure.
    #[must_use]
    pub fn first(&self) -> Option<Error> {
        self.errors.lock().first().cloned()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Returns how many failures were discarded because the sink was full.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_CAPACITY)
    }
}
