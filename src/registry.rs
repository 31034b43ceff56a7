//! Registry of the worker threads spawned for one run.
//!
//! Every worker owns a [`WorkerSlot`] shared with the registry. Workers
//! publish their own run-state into the slot; the clock manager reads all
//! slots in one pass ([`ThreadRegistry::snapshot`]) to decide whether to
//! advance the clock, flag a timeout, or count a deadlock strike.
//!
//! Run-states are published cooperatively, so a snapshot may lag a
//! worker's real state by up to one polling period.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Lifecycle and run-state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// Registered, thread not yet started.
    Created = 0,
    /// Parked at the starting gate.
    AwaitingGate = 1,
    /// Executing user code.
    Running = 2,
    /// Blocked without a bound (clock wait or user blocking call).
    Blocked = 3,
    /// In a bounded wait, such as a sleep.
    TimedWait = 4,
    /// The body has returned, failed, or been cancelled.
    Terminated = 5,
}

impl WorkerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::AwaitingGate,
            2 => Self::Running,
            3 => Self::Blocked,
            4 => Self::TimedWait,
            _ => Self::Terminated,
        }
    }

    /// Returns true until the worker has terminated.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Terminated)
    }

    /// Returns true if the worker counts as making progress on its own.
    ///
    /// A worker that has not yet left the gate is about to run, so it is
    /// treated as running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Created | Self::AwaitingGate | Self::Running)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AwaitingGate => "awaiting-gate",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::TimedWait => "timed-wait",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Shared per-worker record.
#[derive(Debug)]
pub struct WorkerSlot {
    name: String,
    index: usize,
    state: AtomicU8,
}

impl WorkerSlot {
    fn new(name: String, index: usize) -> Self {
        Self {
            name,
            index,
            state: AtomicU8::new(WorkerState::Created as u8),
        }
    }

    /// Returns the worker's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the worker's registration index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Returns the worker's last published state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Publishes `state` until the returned guard drops, then restores the
    /// state it replaced. Guards nest.
    pub(crate) fn enter(&self, state: WorkerState) -> StateGuard<'_> {
        let previous = self.state();
        self.set_state(state);
        StateGuard {
            slot: self,
            previous,
        }
    }
}

/// Restores the replaced state on drop, including during unwinding.
pub(crate) struct StateGuard<'a> {
    slot: &'a WorkerSlot,
    previous: WorkerState,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.slot.set_state(self.previous);
    }
}

/// Counts taken in one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Workers that have not terminated.
    pub(crate) alive: usize,
    /// Workers executing user code (or about to).
    pub(crate) running: usize,
    /// Workers blocked without a bound.
    pub(crate) blocked: usize,
    /// Workers in a bounded wait.
    pub(crate) timed_wait: usize,
}

impl RegistrySnapshot {
    /// Returns true if any worker is running.
    #[must_use]
    pub const fn any_running(&self) -> bool {
        self.running > 0
    }

    /// Returns true if any worker is alive.
    #[must_use]
    pub const fn any_alive(&self) -> bool {
        self.alive > 0
    }

    /// Returns true if any worker is in a bounded wait.
    #[must_use]
    pub const fn any_in_timed_wait(&self) -> bool {
        self.timed_wait > 0
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    slots: Vec<Arc<WorkerSlot>>,
    handles: Vec<(Arc<WorkerSlot>, JoinHandle<()>)>,
    alive: usize,
}

/// All workers of one run.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    inner: Mutex<RegistryInner>,
    quiescent: Condvar,
}

impl ThreadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new worker name and returns its slot.
    ///
    /// The worker counts as alive from this point until
    /// [`mark_terminated`](Self::mark_terminated).
    #[allow(clippy::result_large_err)]
    pub(crate) fn register(&self, name: Option<String>, prefix: &str) -> Result<Arc<WorkerSlot>> {
        let mut inner = self.inner.lock();
        let index = inner.slots.len();
        let taken = |candidate: &str| inner.slots.iter().any(|slot| slot.name == candidate);
        let name = match name {
            Some(name) => name,
            // Generated names skip past any suffix a caller already chose.
            None => (index..)
                .map(|n| format!("{prefix}-{n}"))
                .find(|candidate| !taken(candidate.as_str()))
                .unwrap_or_else(|| format!("{prefix}-{index}")),
        };
        if taken(name.as_str()) {
            return Err(Error::invalid_state(format!(
                "a worker named {name:?} is already registered"
            )));
        }
        let slot = Arc::new(WorkerSlot::new(name, index));
        inner.slots.push(Arc::clone(&slot));
        inner.alive += 1;
        Ok(slot)
    }

    /// Removes a slot whose thread failed to start.
    pub(crate) fn unregister(&self, slot: &Arc<WorkerSlot>) {
        let mut inner = self.inner.lock();
        let before = inner.slots.len();
        inner.slots.retain(|s| !Arc::ptr_eq(s, slot));
        if inner.slots.len() < before {
            inner.alive = inner.alive.saturating_sub(1);
        }
        drop(inner);
        self.quiescent.notify_all();
    }

    /// Stores the join handle of a started worker.
    pub(crate) fn attach(&self, slot: Arc<WorkerSlot>, handle: JoinHandle<()>) {
        self.inner.lock().handles.push((slot, handle));
    }

    /// Marks a worker terminated and wakes anyone waiting for quiescence.
    pub(crate) fn mark_terminated(&self, slot: &WorkerSlot) {
        let mut inner = self.inner.lock();
        if slot.state().is_alive() {
            slot.set_state(WorkerState::Terminated);
            inner.alive = inner.alive.saturating_sub(1);
        }
        drop(inner);
        self.quiescent.notify_all();
    }

    /// Returns the number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Returns true if no workers were registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of workers that have not terminated.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.inner.lock().alive
    }

    /// Takes a consistent snapshot of every worker's run-state.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock();
        let mut snapshot = RegistrySnapshot::default();
        for slot in &inner.slots {
            let state = slot.state();
            if !state.is_alive() {
                continue;
            }
            snapshot.alive += 1;
            match state {
                WorkerState::Blocked => snapshot.blocked += 1,
                WorkerState::TimedWait => snapshot.timed_wait += 1,
                _ => snapshot.running += 1,
            }
        }
        snapshot
    }

    /// Names of workers that have not terminated.
    #[must_use]
    pub fn live_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.state().is_alive())
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Waits up to `timeout` for every worker to terminate.
    ///
    /// Returns true if the registry is quiescent.
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.alive == 0 {
            return true;
        }
        // Spurious wakeups only shorten one polling round.
        let _ = self.quiescent.wait_for(&mut inner, timeout);
        inner.alive == 0
    }

    /// Joins every terminated worker and detaches the rest.
    ///
    /// Returns the names of the workers that were detached.
    pub(crate) fn reap(&self) -> Vec<String> {
        let handles = std::mem::take(&mut self.inner.lock().handles);
        let mut detached = Vec::new();
        for (slot, handle) in handles {
            if slot.state().is_alive() {
                detached.push(slot.name.clone());
                continue;
            }
            // Worker bodies run under catch_unwind; a join error means the
            // runner itself panicked after terminating, which is not a
            // test failure.
            if handle.join().is_err() {
                tracing::warn!(worker = %slot.name, "worker runner panicked after termination");
            }
        }
        detached
    }
}
