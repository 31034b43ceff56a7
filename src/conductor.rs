//! The conductor façade.
//!
//! A [`Conductor`] owns one run: it spawns the workers, drives the starting
//! gate, starts the clock manager, waits for quiescence, and turns the
//! recorded failures into a single outcome.
//!
//! # State machine
//!
//! ```text
//! NotStarted ──execute──▶ GateOpen ──▶ Running ──▶ Finished { success }
//! ```
//!
//! Workers may only be spawned while `NotStarted`; `execute` may only run
//! once.
//!
//! # Example
//!
//! ```
//! use conductor::{Conductor, Tick};
//! use std::sync::mpsc;
//!
//! let conductor = Conductor::new();
//! let (tx, rx) = mpsc::channel();
//!
//! conductor
//!     .thread_named("producer", move |cx| {
//!         tx.send(1).unwrap();
//!         cx.wait_for_tick(1);
//!         tx.send(2).unwrap();
//!     })
//!     .unwrap();
//! conductor
//!     .thread_named("consumer", move |cx| {
//!         assert_eq!(cx.blocking(|| rx.recv().unwrap()), 1);
//!         cx.wait_for_tick(1);
//!         assert_eq!(cx.blocking(|| rx.recv().unwrap()), 2);
//!     })
//!     .unwrap();
//!
//! let report = conductor.execute().unwrap();
//! assert_eq!(report.final_tick, Tick::new(1));
//! ```

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::cancel::{CancelReason, CancelToken};
use crate::clock::{LogicalClock, Tick};
use crate::config::ConductorConfig;
use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::gate::StartingGate;
use crate::manager::ClockManager;
use crate::registry::ThreadRegistry;
use crate::sink::ErrorSink;
use crate::worker::{self, WorkerCx, WorkerHandle};

/// State shared by the conductor, its workers, and the clock manager.
#[derive(Debug)]
pub(crate) struct RunShared {
    pub(crate) clock: LogicalClock,
    pub(crate) registry: ThreadRegistry,
    pub(crate) sink: ErrorSink,
    pub(crate) cancel: CancelToken,
    pub(crate) gate: StartingGate,
}

impl RunShared {
    pub(crate) fn new(error_capacity: usize) -> Self {
        Self {
            clock: LogicalClock::new(),
            registry: ThreadRegistry::new(),
            sink: ErrorSink::new(error_capacity),
            cancel: CancelToken::new(),
            gate: StartingGate::new(),
        }
    }

    /// Records a worker failure and cancels the run.
    pub(crate) fn fail(&self, err: Error) {
        let reason = CancelReason::WorkerFailed {
            worker: err.worker().unwrap_or("unknown").to_string(),
        };
        self.fail_with(err, reason);
    }

    /// Records a failure, then cancels the run with `reason`.
    ///
    /// The failure is recorded first so that anyone observing the
    /// cancellation also observes a non-empty sink.
    pub(crate) fn fail_with(&self, err: Error, reason: CancelReason) {
        self.sink.offer(err);
        self.cancel.cancel(reason);
    }
}

/// Lifecycle state of a [`Conductor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConductorState {
    /// Accepting workers; `execute` has not been called.
    NotStarted,
    /// Workers have been released from the starting gate.
    GateOpen,
    /// The clock manager is arbitrating the run.
    Running,
    /// The run is over.
    Finished {
        /// True if no failure was recorded.
        success: bool,
    },
}

impl fmt::Display for ConductorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::GateOpen => write!(f, "gate open"),
            Self::Running => write!(f, "running"),
            Self::Finished { success: true } => write!(f, "finished (success)"),
            Self::Finished { success: false } => write!(f, "finished (failure)"),
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Clock value when the last worker finished.
    pub final_tick: Tick,
    /// Number of times the clock manager advanced the clock.
    pub advances: u64,
    /// Number of workers that ran.
    pub workers: usize,
    /// Wall time from opening the gate to quiescence.
    pub elapsed: Duration,
}

type FinishFn = Box<dyn FnOnce() + Send + 'static>;

/// Coordinates a multi-threaded test on a logical clock.
pub struct Conductor {
    shared: Arc<RunShared>,
    config: ConductorConfig,
    state: Mutex<ConductorState>,
    finish: Mutex<Option<FinishFn>>,
}

impl fmt::Debug for Conductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conductor")
            .field("state", &*self.state.lock())
            .field("tick", &self.shared.clock.tick())
            .field("workers", &self.shared.registry.len())
            .field("errors", &self.shared.sink.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

impl Conductor {
    /// Creates a conductor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ConductorConfig::default())
    }

    /// Creates a conductor with an explicit configuration.
    ///
    /// The configuration is validated when the run starts; use
    /// [`try_with_config`](Self::try_with_config) to reject it up front.
    #[must_use]
    pub fn with_config(config: ConductorConfig) -> Self {
        Self {
            shared: Arc::new(RunShared::new(config.error_capacity.max(1))),
            config,
            state: Mutex::new(ConductorState::NotStarted),
            finish: Mutex::new(None),
        }
    }

    /// Creates a conductor, rejecting an invalid configuration.
    #[allow(clippy::result_large_err)]
    pub fn try_with_config(config: ConductorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConductorState {
        *self.state.lock()
    }

    #[allow(clippy::result_large_err)]
    fn ensure_not_started(&self, operation: &str) -> Result<()> {
        let state = *self.state.lock();
        if state == ConductorState::NotStarted {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "cannot {operation}: conductor is {state}"
            )))
        }
    }

    #[allow(clippy::result_large_err)]
    fn spawn<T>(&self, name: Option<String>, body: worker::Body<T>) -> Result<WorkerHandle<T>>
    where
        T: Send + 'static,
    {
        self.ensure_not_started("spawn a worker")?;
        let slot = self
            .shared
            .registry
            .register(name, &self.config.thread_name_prefix)?;
        tracing::trace!(worker = %slot.name(), index = slot.index(), "worker registered");
        worker::spawn(&self.shared, slot, body)
    }

    /// Spawns an unnamed worker.
    ///
    /// The worker starts immediately and parks at the starting gate until
    /// [`execute`](Self::execute).
    #[allow(clippy::result_large_err)]
    pub fn thread<T, F>(&self, body: F) -> Result<WorkerHandle<T>>
    where
        F: FnOnce(&WorkerCx) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(None, Box::new(move |cx: &WorkerCx| Ok(body(cx))))
    }

    /// Spawns a named worker. Names must be unique within the run.
    #[allow(clippy::result_large_err)]
    pub fn thread_named<T, F>(&self, name: impl Into<String>, body: F) -> Result<WorkerHandle<T>>
    where
        F: FnOnce(&WorkerCx) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(Some(name.into()), Box::new(move |cx: &WorkerCx| Ok(body(cx))))
    }

    /// Spawns a named worker whose body may return an error.
    ///
    /// An `Err` is recorded as a worker failure, except a cancellation
    /// error from [`WorkerCx::try_checkpoint`], which just ends the worker.
    #[allow(clippy::result_large_err)]
    pub fn try_thread_named<T, E, F>(
        &self,
        name: impl Into<String>,
        body: F,
    ) -> Result<WorkerHandle<T>>
    where
        F: FnOnce(&WorkerCx) -> core::result::Result<T, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.spawn(
            Some(name.into()),
            Box::new(move |cx: &WorkerCx| body(cx).map_err(worker::worker_error)),
        )
    }

    /// Spawns `count` identical workers named with the configured prefix.
    #[allow(clippy::result_large_err)]
    pub fn n_threads<T, F>(&self, count: usize, body: F) -> Result<Vec<WorkerHandle<T>>>
    where
        F: Fn(&WorkerCx) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.fan_out(count, None, body)
    }

    /// Spawns `count` identical workers named `{prefix}-{i}`.
    #[allow(clippy::result_large_err)]
    pub fn n_threads_named<T, F>(
        &self,
        count: usize,
        prefix: &str,
        body: F,
    ) -> Result<Vec<WorkerHandle<T>>>
    where
        F: Fn(&WorkerCx) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.fan_out(count, Some(prefix), body)
    }

    #[allow(clippy::result_large_err)]
    fn fan_out<T, F>(
        &self,
        count: usize,
        prefix: Option<&str>,
        body: F,
    ) -> Result<Vec<WorkerHandle<T>>>
    where
        F: Fn(&WorkerCx) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        let body = Arc::new(body);
        (0..count)
            .map(|i| {
                let body = Arc::clone(&body);
                let name = prefix.map(|p| format!("{p}-{i}"));
                self.spawn(name, Box::new(move |cx: &WorkerCx| Ok(body(cx))))
            })
            .collect()
    }

    /// Returns the current tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.shared.clock.tick()
    }

    /// Runs `f` while the clock is frozen.
    pub fn with_clock_frozen<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.clock.with_frozen(f)
    }

    /// Returns true if any thread holds a clock freeze.
    #[must_use]
    pub fn is_clock_frozen(&self) -> bool {
        self.shared.clock.is_frozen()
    }

    /// Registers a callback to run after every worker has completed
    /// without a failure.
    ///
    /// Only one callback may be registered; a second registration is
    /// rejected so an earlier callback is never silently discarded.
    #[allow(clippy::result_large_err)]
    pub fn finish(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ensure_not_started("register a finish callback")?;
        let mut slot = self.finish.lock();
        if slot.is_some() {
            return Err(Error::invalid_state(
                "a finish callback is already registered",
            ));
        }
        *slot = Some(Box::new(f));
        Ok(())
    }

    /// Returns every recorded failure in insertion order.
    #[must_use]
    pub fn errors(&self) -> Vec<Error> {
        self.shared.sink.all()
    }

    /// Returns how many failures were dropped because the sink was full.
    #[must_use]
    pub fn dropped_errors(&self) -> usize {
        self.shared.sink.dropped()
    }

    /// Runs the conductor with the configured clock period and run limit.
    #[allow(clippy::result_large_err)]
    pub fn execute(&self) -> Result<RunReport> {
        self.execute_with(self.config.clock_period, self.config.run_limit)
    }

    /// Runs the conductor.
    ///
    /// Waits for every worker to reach the starting gate, releases them
    /// together, and arbitrates the clock until all of them finish. Returns
    /// the first recorded failure if there was one; otherwise runs the
    /// `finish` callback and returns a [`RunReport`].
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if called more than once
    /// - `Config` if the configuration, `clock_period`, or `run_limit` is
    ///   invalid; the conductor stays `NotStarted`
    /// - the first recorded `WorkerPanicked`, `WorkerFailed`, `Timeout`, or
    ///   `Deadlock` failure
    /// - `FinishPanicked` if the finish callback panics
    #[allow(clippy::result_large_err)]
    pub fn execute_with(&self, clock_period: Duration, run_limit: Duration) -> Result<RunReport> {
        {
            let mut state = self.state.lock();
            if *state != ConductorState::NotStarted {
                return Err(Error::invalid_state(format!(
                    "execute called on a conductor that is {state}"
                )));
            }
            self.config
                .clone()
                .clock_period(clock_period)
                .run_limit(run_limit)
                .validate()?;
            *state = ConductorState::GateOpen;
        }

        let span = tracing::info_span!(
            "conductor_execute",
            workers = self.shared.registry.len(),
            clock_period_ms = clock_period.as_millis(),
            run_limit_ms = run_limit.as_millis(),
        );
        let _enter = span.enter();

        let workers = self.shared.registry.len();
        self.shared.gate.wait_ready(workers);
        let started = Instant::now();
        self.shared.gate.open();
        tracing::info!(workers, "starting gate opened");

        let manager = ClockManager::new(
            Arc::clone(&self.shared),
            clock_period,
            run_limit,
            self.config.deadlock_strikes,
        );
        let manager = match manager.spawn() {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.shared.fail_with(err, CancelReason::ConductorDropped);
                None
            }
        };
        *self.state.lock() = ConductorState::Running;

        self.await_quiescence(clock_period);
        if let Some(manager) = manager {
            if manager.join().is_err() {
                tracing::warn!("clock manager panicked");
            }
        }
        let detached = self.shared.registry.reap();
        if !detached.is_empty() {
            tracing::warn!(?detached, "workers still running after cancellation; detached");
        }

        self.shared.sink.close();

        let elapsed = started.elapsed();
        let report = RunReport {
            final_tick: self.shared.clock.tick(),
            advances: self.shared.clock.advances(),
            workers,
            elapsed,
        };

        let outcome = match self.shared.sink.first() {
            Some(primary) => Err(primary),
            None => self.run_finish(),
        };
        *self.state.lock() = ConductorState::Finished {
            success: outcome.is_ok(),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    final_tick = %report.final_tick,
                    elapsed_ms = elapsed.as_millis(),
                    "conductor run succeeded"
                );
                Ok(report)
            }
            Err(primary) => {
                tracing::info!(
                    error = %primary,
                    total_errors = self.shared.sink.len(),
                    "conductor run failed"
                );
                Err(primary)
            }
        }
    }

    /// Waits until every worker has terminated, or, once the run is
    /// cancelled, until the grace period runs out.
    fn await_quiescence(&self, poll: Duration) {
        let registry = &self.shared.registry;
        loop {
            if registry.wait_quiescent(poll) {
                return;
            }
            if self.shared.cancel.is_cancelled() {
                let grace = self.config.cancel_grace;
                tracing::debug!(
                    reason = ?self.shared.cancel.reason(),
                    grace_ms = grace.as_millis(),
                    "run cancelled; waiting for workers to stop"
                );
                let deadline = Instant::now() + grace;
                while !registry.wait_quiescent(poll.min(grace)) {
                    if Instant::now() >= deadline {
                        return;
                    }
                }
                return;
            }
        }
    }

    #[allow(clippy::result_large_err)]
    fn run_finish(&self) -> Result<()> {
        let Some(finish) = self.finish.lock().take() else {
            return Ok(());
        };
        panic::catch_unwind(AssertUnwindSafe(finish)).map_err(|payload| {
            Error::new(ErrorKind::FinishPanicked)
                .with_message(panic_message(payload.as_ref()))
                .at_tick(self.shared.clock.tick())
        })
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        if *self.state.get_mut() != ConductorState::NotStarted {
            return;
        }
        if self.shared.registry.is_empty() {
            return;
        }
        // Workers parked at the gate would otherwise wait forever.
        self.shared.cancel.cancel(CancelReason::ConductorDropped);
        let grace = self.config.cancel_grace;
        let deadline = Instant::now() + grace;
        while !self.shared.registry.wait_quiescent(self.config.clock_period) {
            if Instant::now() >= deadline {
                break;
            }
        }
        self.shared.registry.reap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fast_config, init_test_logging};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn zero_workers_completes_trivially() {
        init_test("zero_workers_completes_trivially");
        let conductor = Conductor::with_config(fast_config());
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        conductor
            .finish(move || flag.store(true, Ordering::SeqCst))
            .expect("finish");
        let report = conductor.execute().expect("execute");
        assert_eq!(report.workers, 0);
        assert_eq!(report.final_tick, Tick::ZERO);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(
            conductor.state(),
            ConductorState::Finished { success: true }
        );
        crate::test_complete!("zero_workers_completes_trivially");
    }

    #[test]
    fn execute_twice_fails_fast() {
        init_test("execute_twice_fails_fast");
        let conductor = Conductor::with_config(fast_config());
        conductor.execute().expect("first execute");
        let err = conductor.execute().expect_err("second execute accepted");
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        crate::test_complete!("execute_twice_fails_fast");
    }

    #[test]
    fn spawning_after_execute_is_rejected() {
        init_test("spawning_after_execute_is_rejected");
        let conductor = Conductor::with_config(fast_config());
        conductor.execute().expect("execute");
        let err = conductor.thread(|_| ()).expect_err("late spawn accepted");
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        assert!(conductor.finish(|| ()).is_err());
        crate::test_complete!("spawning_after_execute_is_rejected");
    }

    #[test]
    fn second_finish_registration_rejected() {
        init_test("second_finish_registration_rejected");
        let conductor = Conductor::with_config(fast_config());
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&calls);
        conductor
            .finish(move || {
                first.fetch_add(1, Ordering::SeqCst);
            })
            .expect("first finish");
        let err = conductor
            .finish(|| unreachable!("replacement must not run"))
            .expect_err("second finish accepted");
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        conductor.execute().expect("execute");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        crate::test_complete!("second_finish_registration_rejected");
    }

    #[test]
    fn panicking_finish_is_reported() {
        init_test("panicking_finish_is_reported");
        let conductor = Conductor::with_config(fast_config());
        conductor.thread(|_| ()).expect("spawn");
        conductor
            .finish(|| panic!("finish exploded"))
            .expect("finish");
        let err = conductor.execute().expect_err("finish panic swallowed");
        assert_eq!(err.kind(), ErrorKind::FinishPanicked);
        assert_eq!(err.message(), Some("finish exploded"));
        assert_eq!(
            conductor.state(),
            ConductorState::Finished { success: false }
        );
        crate::test_complete!("panicking_finish_is_reported");
    }

    #[test]
    fn results_are_returned_through_handles() {
        init_test("results_are_returned_through_handles");
        let conductor = Conductor::with_config(fast_config());
        let handles = conductor
            .n_threads_named(3, "sq", |cx| cx.index() * cx.index())
            .expect("spawn");
        conductor.execute().expect("execute");
        let values: Vec<_> = handles.iter().map(|h| h.take_result()).collect();
        assert_eq!(values, vec![Some(0), Some(1), Some(4)]);
        assert_eq!(handles[2].name(), "sq-2");
        assert!(handles.iter().all(WorkerHandle::is_finished));
        assert_eq!(handles[0].take_result(), None);
        crate::test_complete!("results_are_returned_through_handles");
    }

    #[test]
    fn duplicate_worker_name_rejected() {
        init_test("duplicate_worker_name_rejected");
        let conductor = Conductor::with_config(fast_config());
        conductor.thread_named("same", |_| ()).expect("spawn");
        let err = conductor
            .thread_named("same", |_| ())
            .expect_err("duplicate accepted");
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
        conductor.execute().expect("execute");
        crate::test_complete!("duplicate_worker_name_rejected");
    }

    #[test]
    fn dropping_unexecuted_conductor_releases_workers() {
        init_test("dropping_unexecuted_conductor_releases_workers");
        let ran = Arc::new(AtomicBool::new(false));
        let handle = {
            let conductor = Conductor::with_config(fast_config());
            let ran = Arc::clone(&ran);
            conductor
                .thread(move |_| ran.store(true, Ordering::SeqCst))
                .expect("spawn")
        };
        assert!(handle.is_finished());
        assert!(!ran.load(Ordering::SeqCst));
        crate::test_complete!("dropping_unexecuted_conductor_releases_workers");
    }

    #[test]
    fn clock_freeze_is_visible_from_conductor() {
        init_test("clock_freeze_is_visible_from_conductor");
        let conductor = Conductor::with_config(fast_config());
        assert!(!conductor.is_clock_frozen());
        let inside = conductor.with_clock_frozen(|| conductor.is_clock_frozen());
        assert!(inside);
        assert!(!conductor.is_clock_frozen());
        crate::test_complete!("clock_freeze_is_visible_from_conductor");
    }

    #[test]
    fn invalid_config_is_rejected_before_the_run() {
        init_test("invalid_config_is_rejected_before_the_run");
        let config = fast_config().run_limit(Duration::ZERO);
        let err = Conductor::try_with_config(config.clone()).expect_err("zero limit accepted");
        assert_eq!(err.kind(), ErrorKind::Config);

        let ran = Arc::new(AtomicBool::new(false));
        let conductor = Conductor::with_config(config);
        {
            let ran = Arc::clone(&ran);
            conductor
                .thread(move |_| ran.store(true, Ordering::SeqCst))
                .expect("spawn");
        }
        let err = conductor.execute().expect_err("zero limit accepted");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("run_limit"));
        assert_eq!(conductor.state(), ConductorState::NotStarted);
        drop(conductor);
        assert!(!ran.load(Ordering::SeqCst));
        crate::test_complete!("invalid_config_is_rejected_before_the_run");
    }

    #[test]
    fn invalid_execute_arguments_are_rejected() {
        init_test("invalid_execute_arguments_are_rejected");
        let conductor = Conductor::with_config(fast_config());
        let err = conductor
            .execute_with(Duration::ZERO, Duration::from_secs(1))
            .expect_err("zero period accepted");
        assert_eq!(err.kind(), ErrorKind::Config);
        let err = conductor
            .execute_with(Duration::from_millis(2), Duration::ZERO)
            .expect_err("zero limit accepted");
        assert_eq!(err.kind(), ErrorKind::Config);
        conductor.execute().expect("valid execute after rejected arguments");
        crate::test_complete!("invalid_execute_arguments_are_rejected");
    }

    #[test]
    fn failure_recorded_before_first_poll_is_reported() {
        init_test("failure_recorded_before_first_poll_is_reported");
        let conductor = Conductor::with_config(fast_config());
        conductor.thread_named("quick", |_| ()).expect("spawn");
        let finished = Arc::new(AtomicBool::new(false));
        {
            let finished = Arc::clone(&finished);
            conductor
                .finish(move || finished.store(true, Ordering::SeqCst))
                .expect("finish");
        }
        // Recorded without cancelling, so only the final sink check sees it.
        conductor
            .shared
            .sink
            .offer(Error::worker_panicked("early", "failed before the manager polled"));

        let err = conductor.execute().expect_err("early failure lost");
        assert_eq!(err.kind(), ErrorKind::WorkerPanicked);
        assert_eq!(err.worker(), Some("early"));
        assert!(!finished.load(Ordering::SeqCst));
        crate::test_complete!("failure_recorded_before_first_poll_is_reported");
    }

    #[test]
    fn errors_are_fixed_once_execute_returns() {
        init_test("errors_are_fixed_once_execute_returns");
        let conductor = Conductor::with_config(fast_config());
        conductor.thread(|_| panic!("only failure")).expect("spawn");
        let err = conductor.execute().expect_err("failure lost");
        assert_eq!(err.message(), Some("only failure"));

        conductor.shared.fail(Error::worker_panicked("late", "after execute"));
        assert_eq!(conductor.errors().len(), 1);
        assert_eq!(conductor.dropped_errors(), 0);
        crate::test_complete!("errors_are_fixed_once_execute_returns");
    }
}
