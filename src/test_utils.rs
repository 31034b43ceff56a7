//! Test utilities for conductor.
//!
//! Shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A fast configuration for tests that expect timeouts or deadlocks
//!
//! # Example
//! ```
//! use conductor::test_utils::{fast_config, init_test_logging};
//! use conductor::Conductor;
//!
//! init_test_logging();
//! let conductor = Conductor::with_config(fast_config());
//! conductor.thread(|cx| cx.wait_for_tick(2)).unwrap();
//! conductor.execute().unwrap();
//! ```

use std::sync::{Mutex, MutexGuard, Once};
use std::time::Duration;

use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::ConductorConfig;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Configuration with short limits, for tests that expect a timeout or a
/// deadlock to be detected.
///
/// 2ms clock period, 20 strikes, 2s run limit, 200ms cancel grace.
#[must_use]
pub fn fast_config() -> ConductorConfig {
    ConductorConfig::new()
        .clock_period(Duration::from_millis(2))
        .deadlock_strikes(20)
        .run_limit(Duration::from_secs(2))
        .cancel_grace(Duration::from_millis(200))
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a run failed with the given [`ErrorKind`](crate::ErrorKind).
#[macro_export]
macro_rules! assert_run_failed {
    ($result:expr, $kind:expr) => {
        match $result {
            Err(err) => {
                tracing::debug!(error = %err, "run failed as expected");
                assert_eq!(err.kind(), $kind, "unexpected failure: {err}");
                err
            }
            Ok(report) => unreachable!("expected {:?}, run succeeded: {:?}", $kind, report),
        }
    };
}
