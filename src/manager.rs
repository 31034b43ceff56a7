//! Clock manager: the monitor thread that arbitrates a run.
//!
//! Once the gate opens, the manager polls the registry and the clock every
//! clock period until no worker is alive or the run is cancelled. Each
//! poll does exactly one of:
//!
//! 1. **Timeout check.** Some worker is running. If nothing has advanced
//!    the clock for longer than the run limit, record a timeout.
//! 2. **Advance.** No worker is running and some worker waits for a
//!    future tick. Advance the clock by one.
//! 3. **Strike.** No worker is running, nobody can be released by the
//!    clock, and no worker is in a timed wait. Count a strike; enough
//!    consecutive strikes record a deadlock.
//!
//! Running workers are checked first so that a spinning worker is caught
//! even while others wait on the clock. Advancing is tried before striking
//! because releasing waiters may resolve the apparent stall. A frozen clock
//! cannot advance, so a stall behind a freeze counts as a strike unless
//! some worker is in a timed wait that will end on its own.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelReason;
use crate::clock::Tick;
use crate::conductor::RunShared;
use crate::error::{Error, ErrorKind, Result};

/// Default interval between manager polls.
pub const DEFAULT_CLOCK_PERIOD: Duration = Duration::from_millis(10);
/// Default time a worker may run without the clock advancing.
pub const DEFAULT_RUN_LIMIT: Duration = Duration::from_secs(5);
/// Default number of consecutive idle polls before declaring a deadlock.
pub const DEFAULT_DEADLOCK_STRIKES: u32 = 50;

/// What a single manager poll decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Poll {
    /// No worker is alive; the manager stops.
    Quiescent,
    /// The run was cancelled elsewhere; the manager stops.
    Cancelled,
    /// Workers are running within the run limit.
    Running,
    /// The clock advanced to the given tick.
    Advanced(Tick),
    /// Workers are in bounded waits; nothing to do.
    TimedWait,
    /// An idle poll was counted.
    Strike(u32),
    /// A timeout was recorded.
    TimedOut,
    /// A deadlock was recorded.
    Deadlocked,
}

impl Poll {
    /// Returns true if the manager stops after this poll.
    #[must_use]
    pub(crate) const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Quiescent | Self::Cancelled | Self::TimedOut | Self::Deadlocked
        )
    }
}

/// Per-run arbitration state, owned by the manager thread.
#[derive(Debug)]
pub(crate) struct ClockManager {
    shared: Arc<RunShared>,
    period: Duration,
    run_limit: Duration,
    strike_limit: u32,
    last_progress: Instant,
    strikes: u32,
}

impl ClockManager {
    pub(crate) fn new(
        shared: Arc<RunShared>,
        period: Duration,
        run_limit: Duration,
        strike_limit: u32,
    ) -> Self {
        Self {
            shared,
            period,
            run_limit,
            strike_limit,
            last_progress: Instant::now(),
            strikes: 0,
        }
    }

    /// Starts the manager on its own thread.
    #[allow(clippy::result_large_err)]
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("conductor-clock-manager".to_string())
            .spawn(move || self.run())
            .map_err(|err| {
                Error::new(ErrorKind::Spawn)
                    .with_message("failed to spawn clock manager")
                    .with_source(err)
            })
    }

    fn run(mut self) {
        self.last_progress = Instant::now();
        loop {
            let poll = self.poll(Instant::now());
            if poll.is_terminal() {
                tracing::debug!(?poll, tick = %self.shared.clock.tick(), "clock manager stopping");
                return;
            }
            thread::sleep(self.period);
        }
    }

    /// Runs one arbitration step as of `now`.
    pub(crate) fn poll(&mut self, now: Instant) -> Poll {
        let snapshot = self.shared.registry.snapshot();
        if !snapshot.any_alive() {
            return Poll::Quiescent;
        }
        if self.shared.cancel.is_cancelled() {
            return Poll::Cancelled;
        }

        let clock = &self.shared.clock;
        if snapshot.any_running() {
            self.strikes = 0;
            let stalled = now.saturating_duration_since(self.last_progress);
            if stalled > self.run_limit {
                self.time_out(stalled);
                return Poll::TimedOut;
            }
            return Poll::Running;
        }

        if clock.anyone_waiting_for_future_tick() {
            if let Some(tick) = clock.try_advance() {
                tracing::debug!(%tick, blocked = snapshot.blocked, "all workers blocked; clock advanced");
                self.last_progress = now;
                self.strikes = 0;
                return Poll::Advanced(tick);
            }
            tracing::trace!("clock frozen; advance deferred");
        }
        if snapshot.any_in_timed_wait() {
            return Poll::TimedWait;
        }

        self.strikes += 1;
        tracing::trace!(strikes = self.strikes, limit = self.strike_limit, "no progress observed");
        if self.strikes >= self.strike_limit {
            self.deadlock();
            return Poll::Deadlocked;
        }
        Poll::Strike(self.strikes)
    }

    fn time_out(&self, stalled: Duration) {
        let tick = self.shared.clock.tick();
        let running = self.shared.registry.live_names();
        tracing::warn!(
            %tick,
            stalled_ms = stalled.as_millis(),
            limit_ms = self.run_limit.as_millis(),
            ?running,
            "run limit exceeded"
        );
        let err = Error::new(ErrorKind::Timeout)
            .with_message(format!(
                "workers ran for {}ms without the clock advancing (limit {}ms); live: {}",
                stalled.as_millis(),
                self.run_limit.as_millis(),
                running.join(", ")
            ))
            .at_tick(tick);
        self.shared.fail_with(err, CancelReason::Timeout);
    }

    fn deadlock(&self) {
        let tick = self.shared.clock.tick();
        let blocked = self.shared.registry.live_names();
        let silent = self.period * self.strike_limit;
        tracing::warn!(
            %tick,
            strikes = self.strikes,
            silent_ms = silent.as_millis(),
            ?blocked,
            "apparent deadlock"
        );
        let err = Error::new(ErrorKind::Deadlock)
            .with_message(format!(
                "all workers blocked for {} clock periods ({}ms) with nothing able to advance the clock; blocked: {}",
                self.strikes,
                silent.as_millis(),
                blocked.join(", ")
            ))
            .at_tick(tick);
        self.shared.fail_with(err, CancelReason::Deadlock);
    }
}
