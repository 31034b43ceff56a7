//! Worker threads and the capability context handed to their bodies.
//!
//! A worker thread runs a fixed protocol:
//!
//! 1. publish `AwaitingGate` and arrive at the starting gate
//! 2. park until the conductor opens the gate
//! 3. run the body under `catch_unwind`
//! 4. record any escaping failure and cancel the rest of the run
//! 5. publish `Terminated`
//!
//! Cancellation is cooperative. Blocking helpers on [`WorkerCx`] are
//! checkpoints: once the run is cancelled they unwind the body with a
//! private marker payload. The runner recognises the marker, so a
//! cancelled worker is never reported as a failure of its own.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Tick;
use crate::conductor::RunShared;
use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::registry::{WorkerSlot, WorkerState};

/// Longest uninterrupted sleep inside [`WorkerCx::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Unwind payload used to stop a cancelled worker.
struct CancelUnwind;

fn unwind_cancelled() -> ! {
    // resume_unwind skips the panic hook, so cancelled workers stay quiet.
    panic::resume_unwind(Box::new(CancelUnwind))
}

/// Context passed to every worker body.
///
/// Gives the body access to the run's logical clock and to the cooperative
/// blocking helpers the clock manager relies on to tell running workers
/// from blocked ones.
#[derive(Debug)]
pub struct WorkerCx {
    slot: Arc<WorkerSlot>,
    shared: Arc<RunShared>,
}

impl WorkerCx {
    /// Returns this worker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// Returns this worker's registration index within the run.
    #[must_use]
    pub fn index(&self) -> usize {
        self.slot.index()
    }

    /// Returns the current tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.shared.clock.tick()
    }

    /// Returns the run-state this worker currently publishes.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.slot.state()
    }

    /// Blocks until the clock reaches `target`.
    ///
    /// The worker counts as blocked while it waits. If the run is cancelled
    /// the body unwinds.
    pub fn wait_for_tick(&self, target: impl Into<Tick>) {
        let target = target.into();
        let clock = &self.shared.clock;
        if clock
            .wait_for_tick_as(target, &self.slot, &self.shared.cancel)
            .is_err()
        {
            unwind_cancelled();
        }
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

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Unwinds the body if the run has been cancelled.
    pub fn checkpoint(&self) {
        if self.is_cancelled() {
            unwind_cancelled();
        }
    }

    /// Returns `Err(Cancelled)` if the run has been cancelled.
    ///
    /// For fallible bodies that prefer `?` over unwinding.
    #[allow(clippy::result_large_err)]
    pub fn try_checkpoint(&self) -> Result<()> {
        self.shared
            .cancel
            .checkpoint()
            .map_err(|e| e.on_worker(self.name()).at_tick(self.tick()))
    }

    /// Runs a user-level blocking call, such as a lock acquisition or a
    /// channel receive, with the worker marked blocked.
    ///
    /// Calls that can block forever must go through here so the clock
    /// manager can advance the clock or detect a deadlock instead of
    /// reporting a timeout.
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        let _state = self.slot.enter(WorkerState::Blocked);
        f()
    }

    /// Runs a bounded blocking call with the worker marked as in a timed
    /// wait. Timed waits never count toward deadlock detection.
    pub fn timed_blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        let _state = self.slot.enter(WorkerState::TimedWait);
        f()
    }

    /// Sleeps for `duration` in a timed wait.
    ///
    /// Checks for cancellation between short slices.
    pub fn sleep(&self, duration: Duration) {
        let _state = self.slot.enter(WorkerState::TimedWait);
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint();
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    slot: Arc<WorkerSlot>,
    result: Arc<Mutex<Option<T>>>,
}

impl<T> WorkerHandle<T> {
    /// Returns the worker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// Returns the worker's registration index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.slot.index()
    }

    /// Returns the worker's last published state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.slot.state()
    }

    /// Returns true once the worker has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.slot.state().is_alive()
    }

    /// Takes the value returned by the body.
    ///
    /// `None` until the body completes successfully, and after the value
    /// has been taken once.
    pub fn take_result(&self) -> Option<T> {
        self.result.lock().take()
    }
}

/// Boxed fallible body after normalisation by the conductor.
pub(crate) type Body<T> = Box<dyn FnOnce(&WorkerCx) -> Result<T> + Send + 'static>;

/// Converts a user error into a worker failure, passing cancellation
/// through unchanged.
pub(crate) fn worker_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let Some(own) = (&err as &dyn Any).downcast_ref::<Error>() {
        if own.is_cancelled() {
            return own.clone();
        }
    }
    Error::new(ErrorKind::WorkerFailed)
        .with_message(err.to_string())
        .with_source(err)
}

/// Starts a worker thread for `slot`.
///
/// On spawn failure the slot is removed from the registry so the starting
/// gate does not wait for it.
#[allow(clippy::result_large_err)]
pub(crate) fn spawn<T>(
    shared: &Arc<RunShared>,
    slot: Arc<WorkerSlot>,
    body: Body<T>,
) -> Result<WorkerHandle<T>>
where
    T: Send + 'static,
{
    let result = Arc::new(Mutex::new(None));
    let handle = WorkerHandle {
        slot: Arc::clone(&slot),
        result: Arc::clone(&result),
    };

    let runner_shared = Arc::clone(shared);
    let runner_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name(slot.name().to_string())
        .spawn(move || run(&runner_shared, &runner_slot, &result, body));

    match spawned {
        Ok(join) => {
            shared.registry.attach(slot, join);
            Ok(handle)
        }
        Err(err) => {
            shared.registry.unregister(&slot);
            Err(Error::new(ErrorKind::Spawn)
                .with_message("failed to spawn worker thread")
                .on_worker(slot.name())
                .with_source(err))
        }
    }
}

fn run<T>(
    shared: &Arc<RunShared>,
    slot: &Arc<WorkerSlot>,
    result: &Mutex<Option<T>>,
    body: Body<T>,
) {
    slot.set_state(WorkerState::AwaitingGate);
    shared.gate.arrive();
    if shared.gate.wait_open(&shared.cancel).is_err() {
        tracing::debug!(worker = %slot.name(), "released from gate by cancellation");
        shared.registry.mark_terminated(slot);
        return;
    }

    slot.set_state(WorkerState::Running);
    tracing::trace!(worker = %slot.name(), "worker started");

    let cx = WorkerCx {
        slot: Arc::clone(slot),
        shared: Arc::clone(shared),
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&cx)));
    let tick = shared.clock.tick();

    match outcome {
        Ok(Ok(value)) => {
            *result.lock() = Some(value);
            tracing::trace!(worker = %slot.name(), %tick, "worker finished");
        }
        Ok(Err(err)) if err.is_cancelled() => {
            tracing::debug!(worker = %slot.name(), %tick, "worker stopped by cancellation");
        }
        Ok(Err(err)) => {
            shared.fail(err.on_worker(slot.name()).at_tick(tick));
        }
        Err(payload) if payload.is::<CancelUnwind>() => {
            tracing::debug!(worker = %slot.name(), %tick, "worker stopped by cancellation");
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            shared.fail(Error::worker_panicked(slot.name(), message).at_tick(tick));
        }
    }

    shared.registry.mark_terminated(slot);
}
