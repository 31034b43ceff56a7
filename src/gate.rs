//! Two-phase starting gate.
//!
//! Each worker thread [`arrive`](StartingGate::arrive)s as soon as it starts
//! and then parks in [`wait_open`](StartingGate::wait_open). The conductor
//! waits until every registered worker has arrived, then opens the gate
//! once, releasing all of them together. No worker body can start before
//! every worker is parked, so no release can be missed.
//!
//! A gate opens at most once and is never reset.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::Result;

const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct GateState {
    ready: usize,
    open: bool,
}

/// Ready latch plus go latch for one run.
#[derive(Debug, Default)]
pub struct StartingGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl StartingGate {
    /// Creates a closed gate with no arrivals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that the calling worker is ready to run.
    pub fn arrive(&self) {
        let mut state = self.state.lock();
        state.ready += 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Returns how many workers have arrived.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.state.lock().ready
    }

    /// Blocks until at least `expected` workers have arrived.
    pub fn wait_ready(&self, expected: usize) {
        let mut state = self.state.lock();
        while state.ready < expected {
            self.changed.wait(&mut state);
        }
    }

    /// Opens the gate, releasing every parked worker.
    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        drop(state);
        self.changed.notify_all();
    }

    /// Returns true once the gate has opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Blocks until the gate opens.
    ///
    /// Returns `Err(Cancelled)` if `cancel` trips first.
    #[allow(clippy::result_large_err)]
    pub fn wait_open(&self, cancel: &CancelToken) -> Result<()> {
        let mut state = self.state.lock();
        while !state.open {
            cancel.checkpoint()?;
            self.changed.wait_for(&mut state, WAIT_SLICE);
        }
        Ok(())
    }
}
