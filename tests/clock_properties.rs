//! Property tests over whole conductor runs.
//!
//! For arbitrary worker counts and tick targets, a run ends exactly at the
//! highest tick any worker waited for, and every worker observes a clock
//! at or past its own target.

#[macro_use]
mod common;

use common::*;
use conductor::Tick;
use proptest::prelude::*;
use std::sync::Arc;

fn init_test(test_name: &str) {
    init_test_logging_with_level(tracing::Level::INFO);
    test_phase!(test_name);
}

proptest! {
    #![proptest_config(test_proptest_config(16))]

    #[test]
    fn run_ends_at_highest_target(targets in prop::collection::vec(0u64..6, 1..5)) {
        init_test("run_ends_at_highest_target");
        let conductor = fast_conductor();
        let targets = Arc::new(targets);

        let handles = conductor
            .n_threads(targets.len(), {
                let targets = Arc::clone(&targets);
                move |cx| {
                    let target = targets[cx.index()];
                    cx.wait_for_tick(target);
                    cx.tick()
                }
            })
            .expect("spawn");

        let report = conductor.execute().expect("execute");
        let highest = targets.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(report.final_tick, Tick::new(highest));
        prop_assert_eq!(report.advances, highest);

        for (handle, &target) in handles.iter().zip(targets.iter()) {
            let seen = handle.take_result().expect("worker result");
            prop_assert!(seen >= Tick::new(target), "{} saw {} before {}", handle.name(), seen, target);
        }
    }

    #[test]
    fn sequential_waits_observe_every_tick(steps in 1u64..6) {
        init_test("sequential_waits_observe_every_tick");
        let conductor = fast_conductor();
        let walker = conductor
            .thread_named("walker", move |cx| {
                (1..=steps)
                    .map(|t| {
                        cx.wait_for_tick(t);
                        cx.tick()
                    })
                    .collect::<Vec<_>>()
            })
            .expect("spawn");

        conductor.execute().expect("execute");
        let seen = walker.take_result().expect("walker result");
        let expected: Vec<Tick> = (1..=steps).map(Tick::new).collect();
        prop_assert_eq!(seen, expected);
    }
}
