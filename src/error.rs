//! Error types for the conductor.
//!
//! A run can fail for one of three reportable reasons:
//!
//! - **Worker failures**: a worker body panicked or returned an error
//! - **Timeouts**: a worker ran unblocked for longer than the run limit
//! - **Deadlocks**: every live worker stayed blocked with nothing able to
//!   advance the clock
//!
//! All three are captured into the run's [`ErrorSink`](crate::ErrorSink) by
//! the thread that detected them and surfaced by
//! [`Conductor::execute`](crate::Conductor::execute) on the calling thread.
//! The remaining kinds describe misuse of the conductor itself.

use core::fmt;
use std::sync::Arc;

use crate::clock::Tick;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Run failures ===
    /// A worker body panicked.
    WorkerPanicked,
    /// A fallible worker body returned an error.
    WorkerFailed,
    /// A worker ran without blocking for longer than the run limit.
    Timeout,
    /// All live workers were blocked and nothing could advance the clock.
    Deadlock,
    /// The `finish` callback panicked.
    FinishPanicked,

    // === Usage / setup ===
    /// A blocking operation observed run cancellation.
    Cancelled,
    /// The conductor was driven through an illegal state transition.
    InvalidStateTransition,
    /// Invalid configuration.
    Config,
    /// A worker or manager thread could not be spawned.
    Spawn,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::WorkerPanicked
            | Self::WorkerFailed
            | Self::Timeout
            | Self::Deadlock
            | Self::FinishPanicked => ErrorCategory::Failure,
            Self::Cancelled | Self::InvalidStateTransition | Self::Config | Self::Spawn => {
                ErrorCategory::Usage
            }
        }
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A reportable test failure.
    Failure,
    /// Misuse of the conductor or an environment problem.
    Usage,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The worker the error originated on, if any.
    pub worker: Option<String>,
    /// Logical clock value when the error was recorded.
    pub tick: Option<Tick>,
}

/// The main error type for conductor operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                worker: None,
                tick: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the message, if one was attached.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the diagnostic context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns the worker this error originated on.
    #[must_use]
    pub fn worker(&self) -> Option<&str> {
        self.context.worker.as_deref()
    }

    /// Returns true for worker panics and worker errors.
    #[must_use]
    pub const fn is_worker_failure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::WorkerPanicked | ErrorKind::WorkerFailed
        )
    }

    /// Returns true if the run exceeded its run limit.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns true if the run was declared deadlocked.
    #[must_use]
    pub const fn is_deadlock(&self) -> bool {
        matches!(self.kind, ErrorKind::Deadlock)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Records the worker the error originated on.
    #[must_use]
    pub fn on_worker(mut self, worker: impl Into<String>) -> Self {
        self.context.worker = Some(worker.into());
        self
    }

    /// Records the logical time the error was observed at.
    #[must_use]
    pub fn at_tick(mut self, tick: Tick) -> Self {
        self.context.tick = Some(tick);
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a worker panic error from a panic message.
    #[must_use]
    pub fn worker_panicked(worker: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerPanicked)
            .with_message(message)
            .on_worker(worker)
    }

    /// Creates an illegal-transition error.
    #[must_use]
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(worker) = &self.context.worker {
            write!(f, " [{worker}]")?;
        }
        if let Some(tick) = self.context.tick {
            write!(f, " @ tick {tick}")?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A specialized Result type for conductor operations.
pub type Result<T> = core::result::Result<T, Error>;
