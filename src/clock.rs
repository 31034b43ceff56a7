//! Discrete logical clock shared by every worker of a run.
//!
//! The clock holds a monotonically increasing [`Tick`]. Workers block in
//! [`LogicalClock::wait_for_tick`] until the clock reaches a target; only
//! the clock manager advances it, one tick at a time, and only when no
//! worker is running.
//!
//! # Freezing
//!
//! [`LogicalClock::with_frozen`] holds the shared side of a read-write lock
//! for the duration of its body. Advancing requires the exclusive side, so
//! the clock cannot move while any thread holds a freeze. Freezes compose:
//! any number of threads (or nested calls on one thread) may hold one at
//! the same time.
//!
//! # Waiter hand-off
//!
//! When the clock advances, every waiter whose target is now satisfied gets
//! back the run-state it had before waiting (normally `Running`) under the
//! clock lock, before it is woken. The manager
//! therefore never sees a released waiter as still blocked and cannot
//! advance twice for a single release.

use core::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::registry::{WorkerSlot, WorkerState};

/// How long a waiter sleeps between cancellation checks.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// A point in logical time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Tick(u64);

impl Tick {
    /// The initial tick of every run.
    pub const ZERO: Self = Self(0);

    /// Creates a tick from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Add<u64> for Tick {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl From<u64> for Tick {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    target: Tick,
    slot: Option<Arc<WorkerSlot>>,
    resume: WorkerState,
}

#[derive(Debug, Default)]
struct ClockState {
    tick: Tick,
    high_water: Tick,
    advances: u64,
    next_waiter: u64,
    waiters: Vec<Waiter>,
}

impl ClockState {
    fn remove_waiter(&mut self, id: u64) {
        self.waiters.retain(|w| w.id != id);
    }
}

/// The logical clock of a conductor run.
#[derive(Debug, Default)]
pub struct LogicalClock {
    state: Mutex<ClockState>,
    ticked: Condvar,
    freeze: RwLock<()>,
    freezers: AtomicUsize,
}

impl LogicalClock {
    /// Creates a clock at [`Tick::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current tick.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.state.lock().tick
    }

    /// Returns the greatest tick any thread has waited for.
    #[must_use]
    pub fn high_water(&self) -> Tick {
        self.state.lock().high_water
    }

    /// Returns how many times the clock has advanced.
    #[must_use]
    pub fn advances(&self) -> u64 {
        self.state.lock().advances
    }

    /// Returns true if some thread is waiting for a tick the clock has not
    /// reached yet.
    #[must_use]
    pub fn anyone_waiting_for_future_tick(&self) -> bool {
        let state = self.state.lock();
        state.high_water > state.tick
    }

    /// Returns true if at least one thread currently holds a freeze.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.freezers.load(Ordering::Acquire) > 0
    }

    /// Runs `f` with the clock frozen.
    ///
    /// The clock cannot advance until `f` returns (or unwinds).
    pub fn with_frozen<R>(&self, f: impl FnOnce() -> R) -> R {
        let _freeze = FreezeGuard::acquire(self);
        f()
    }

    /// Advances the clock by one tick, blocking while it is frozen.
    #[cfg(test)]
    pub(crate) fn advance(&self) -> Tick {
        let _exclusive = self.freeze.write();
        self.advance_unfrozen()
    }

    /// Advances the clock by one tick unless it is frozen.
    pub(crate) fn try_advance(&self) -> Option<Tick> {
        let _exclusive = self.freeze.try_write()?;
        Some(self.advance_unfrozen())
    }

    fn advance_unfrozen(&self) -> Tick {
        let mut state = self.state.lock();
        let tick = state.tick.next();
        state.tick = tick;
        state.advances += 1;
        state.waiters.retain(|waiter| {
            if waiter.target > tick {
                return true;
            }
            if let Some(slot) = &waiter.slot {
                slot.set_state(waiter.resume);
            }
            false
        });
        drop(state);
        self.ticked.notify_all();
        tracing::trace!(%tick, "logical clock advanced");
        tick
    }

    /// Blocks until the clock reaches `target`.
    ///
    /// Returns immediately if the clock is already at or past `target`.
    /// Returns `Err(Cancelled)` if `cancel` trips while waiting.
    #[allow(clippy::result_large_err)]
    pub fn wait_for_tick(&self, target: Tick, cancel: &CancelToken) -> Result<()> {
        self.wait(target, None, cancel)
    }

    /// Like [`wait_for_tick`](Self::wait_for_tick), publishing the wait on
    /// the worker's run-state.
    #[allow(clippy::result_large_err)]
    pub(crate) fn wait_for_tick_as(
        &self,
        target: Tick,
        slot: &Arc<WorkerSlot>,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.wait(target, Some(slot), cancel)
    }

    #[allow(clippy::result_large_err)]
    fn wait(
        &self,
        target: Tick,
        slot: Option<&Arc<WorkerSlot>>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.tick >= target {
            return Ok(());
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        state.high_water = state.high_water.max(target);
        let resume = slot.map_or(WorkerState::Running, |slot| slot.state());
        state.waiters.push(Waiter {
            id,
            target,
            slot: slot.cloned(),
            resume,
        });
        if let Some(slot) = slot {
            slot.set_state(WorkerState::Blocked);
        }
        tracing::trace!(%target, current = %state.tick, "waiting for tick");

        while state.tick < target {
            if let Err(err) = cancel.checkpoint() {
                state.remove_waiter(id);
                if let Some(slot) = slot {
                    slot.set_state(resume);
                }
                return Err(err.at_tick(state.tick));
            }
            self.ticked.wait_for(&mut state, WAIT_SLICE);
        }
        Ok(())
    }
}

/// Shared hold on the clock's freeze lock.
struct FreezeGuard<'a> {
    _shared: RwLockReadGuard<'a, ()>,
    freezers: &'a AtomicUsize,
}

impl<'a> FreezeGuard<'a> {
    fn acquire(clock: &'a LogicalClock) -> Self {
        // Recursive so a nested freeze never queues behind a pending advance.
        let shared = clock.freeze.read_recursive();
        clock.freezers.fetch_add(1, Ordering::AcqRel);
        Self {
            _shared: shared,
            freezers: &clock.freezers,
        }
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        self.freezers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use crate::test_utils::init_test_logging;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn starts_at_zero() {
        init_test("starts_at_zero");
        let clock = LogicalClock::new();
        assert_eq!(clock.tick(), Tick::ZERO);
        assert!(!clock.is_frozen());
        assert!(!clock.anyone_waiting_for_future_tick());
        crate::test_complete!("starts_at_zero");
    }

    proptest! {
        #[test]
        fn advance_increments_by_exactly_one(steps in 0_usize..64) {
            let clock = LogicalClock::new();
            let mut previous = clock.tick();
            for _ in 0..steps {
                let next = clock.advance();
                prop_assert_eq!(next.get(), previous.get() + 1);
                prop_assert_eq!(clock.tick(), next);
                previous = next;
            }
            prop_assert_eq!(clock.advances(), steps as u64);
        }
    }

    #[test]
    fn wait_returns_immediately_when_satisfied() {
        init_test("wait_returns_immediately_when_satisfied");
        let clock = LogicalClock::new();
        let cancel = CancelToken::new();
        clock.advance();
        clock.wait_for_tick(Tick::new(1), &cancel).expect("wait");
        clock.wait_for_tick(Tick::ZERO, &cancel).expect("wait");
        assert_eq!(clock.high_water(), Tick::ZERO);
        crate::test_complete!("wait_returns_immediately_when_satisfied");
    }

    #[test]
    fn waiters_on_different_targets_release_in_order() {
        init_test("waiters_on_different_targets_release_in_order");
        let clock = Arc::new(LogicalClock::new());
        let cancel = Arc::new(CancelToken::new());
        let (tx, rx) = mpsc::channel();

        let mut handles = Vec::new();
        for target in [2_u64, 1] {
            let clock = Arc::clone(&clock);
            let cancel = Arc::clone(&cancel);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                clock
                    .wait_for_tick(Tick::new(target), &cancel)
                    .expect("wait");
                tx.send(target).expect("send");
            }));
        }

        while clock.high_water() < Tick::new(2) {
            thread::yield_now();
        }
        assert!(clock.anyone_waiting_for_future_tick());

        clock.advance();
        assert_eq!(rx.recv().expect("recv"), 1);
        clock.advance();
        assert_eq!(rx.recv().expect("recv"), 2);
        assert!(!clock.anyone_waiting_for_future_tick());

        for handle in handles {
            handle.join().expect("waiter panicked");
        }
        crate::test_complete!("waiters_on_different_targets_release_in_order");
    }

    #[test]
    fn freeze_blocks_advance_until_released() {
        init_test("freeze_blocks_advance_until_released");
        let clock = Arc::new(LogicalClock::new());
        let (frozen_tx, frozen_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                clock.with_frozen(|| {
                    frozen_tx.send(()).expect("send");
                    release_rx.recv().expect("recv");
                });
            })
        };
        frozen_rx.recv().expect("recv");
        assert!(clock.is_frozen());
        assert!(clock.try_advance().is_none());
        assert_eq!(clock.tick(), Tick::ZERO);

        let advancer = {
            let clock = Arc::clone(&clock);
            thread::spawn(move || clock.advance())
        };
        thread::sleep(Duration::from_millis(30));
        crate::assert_with_log!(
            clock.tick() == Tick::ZERO,
            "tick while frozen",
            Tick::ZERO,
            clock.tick()
        );

        release_tx.send(()).expect("send");
        holder.join().expect("holder panicked");
        let advanced = advancer.join().expect("advancer panicked");
        assert_eq!(advanced, Tick::new(1));
        assert!(!clock.is_frozen());
        crate::test_complete!("freeze_blocks_advance_until_released");
    }

    #[test]
    fn freezes_compose() {
        init_test("freezes_compose");
        let clock = LogicalClock::new();
        clock.with_frozen(|| {
            clock.with_frozen(|| {
                assert!(clock.is_frozen());
                assert!(clock.try_advance().is_none());
            });
            assert!(clock.is_frozen());
        });
        assert!(!clock.is_frozen());
        assert_eq!(clock.try_advance(), Some(Tick::new(1)));
        crate::test_complete!("freezes_compose");
    }

    #[test]
    fn freeze_released_on_unwind() {
        init_test("freeze_released_on_unwind");
        let clock = LogicalClock::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            clock.with_frozen(|| panic!("inside freeze"));
        }));
        assert!(result.is_err());
        assert!(!clock.is_frozen());
        crate::test_complete!("freeze_released_on_unwind");
    }

    #[test]
    fn cancellation_releases_waiter() {
        init_test("cancellation_releases_waiter");
        let clock = Arc::new(LogicalClock::new());
        let cancel = Arc::new(CancelToken::new());
        let waiter = {
            let clock = Arc::clone(&clock);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || clock.wait_for_tick(Tick::new(5), &cancel))
        };
        while !clock.anyone_waiting_for_future_tick() {
            thread::yield_now();
        }
        cancel.cancel(CancelReason::Deadlock);
        let err = waiter
            .join()
            .expect("waiter panicked")
            .expect_err("expected cancellation");
        assert!(err.is_cancelled());
        assert_eq!(err.context().tick, Some(Tick::ZERO));
        crate::test_complete!("cancellation_releases_waiter");
    }

    #[test]
    fn tick_arithmetic_saturates() {
        assert_eq!(Tick::new(u64::MAX).next(), Tick::new(u64::MAX));
        assert_eq!(Tick::new(3) + 4, Tick::new(7));
        assert_eq!(Tick::new(9).to_string(), "9");
    }

    #[test]
    fn released_waiter_resumes_its_previous_state() {
        init_test("released_waiter_resumes_its_previous_state");
        let clock = Arc::new(LogicalClock::new());
        let cancel = Arc::new(CancelToken::new());
        let registry = crate::registry::ThreadRegistry::new();
        let slot = registry.register(None, "w").expect("register");
        slot.set_state(WorkerState::TimedWait);

        let waiter = {
            let clock = Arc::clone(&clock);
            let cancel = Arc::clone(&cancel);
            let slot = Arc::clone(&slot);
            thread::spawn(move || clock.wait_for_tick_as(Tick::new(1), &slot, &cancel))
        };
        while slot.state() != WorkerState::Blocked {
            thread::yield_now();
        }
        clock.advance();
        assert_eq!(slot.state(), WorkerState::TimedWait);
        waiter.join().expect("waiter panicked").expect("wait");
        assert_eq!(slot.state(), WorkerState::TimedWait);
        crate::test_complete!("released_waiter_resumes_its_previous_state");
    }
}
