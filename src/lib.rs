//! Conductor: deterministic coordination of multi-threaded tests.
//!
//! # Overview
//!
//! Interleaving bugs are hard to test because thread schedules are not
//! repeatable. A [`Conductor`] makes the schedule explicit: every worker
//! thread is released from a common starting gate, and workers order their
//! steps against a shared logical clock. The clock only advances when every
//! live worker is blocked and at least one of them is waiting for a future
//! tick, so "step 2 happens after step 1" becomes `cx.wait_for_tick(1)`.
//!
//! # Core Guarantees
//!
//! - **Simultaneous start**: no worker body runs before every worker is parked at the gate
//! - **Monotonic clock**: ticks only increase, one at a time
//! - **Freezing**: code inside `with_clock_frozen` never observes an advance
//! - **Failure containment**: a failing worker cancels the run and its error is reported
//! - **Liveness**: runs that exceed their wall-time limit or deadlock fail instead of hanging
//!
//! # Module Structure
//!
//! - [`conductor`]: The façade, its lifecycle, and run reports
//! - [`worker`]: Worker threads, the worker context, and result handles
//! - [`clock`]: Logical clock, tick waiting, and freezing
//! - [`manager`]: Clock manager, advance arbitration, timeout and deadlock detection
//! - [`registry`]: Thread registry and worker run-states
//! - [`gate`]: Two-phase starting gate
//! - [`sink`]: Bounded error sink
//! - [`cancel`]: Cooperative cancellation
//! - [`config`]: Configuration, environment overrides, optional TOML files
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod clock;
pub mod conductor;
pub mod config;
pub mod error;
pub mod gate;
pub mod manager;
pub mod registry;
pub mod sink;
pub mod test_utils;
pub mod worker;

pub use cancel::{CancelReason, CancelToken};
pub use clock::{LogicalClock, Tick};
pub use conductor::{Conductor, ConductorState, RunReport};
pub use config::{ConductorConfig, ConfigError};
pub use error::{Error, ErrorCategory, ErrorContext, ErrorKind, Result};
pub use registry::{RegistrySnapshot, WorkerState};
pub use sink::ErrorSink;
pub use worker::{WorkerCx, WorkerHandle};
