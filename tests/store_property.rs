//! Structural properties of stores and permit ordering.
//!
//! Uses proptest to verify:
//! - single creation: however resolutions interleave, each key is created
//!   once and all resolvers observe the same allocation
//! - deadlock freedom: arbitrary overlapping key sets, acquired from
//!   multiple threads in arbitrary declaration orders, always complete

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use fixture_resource::{
    BoxError, ExclusionCoordinator, FactoryProvider, InjectionPoint, InjectionSpec,
    LifecycleManager, PermitKey, Resource, ResourceFactory, Scope,
};

// ---------------------------------------------------------------------------
// Test factory: every created resource gets a process-unique id
// ---------------------------------------------------------------------------

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

struct Tagged {
    value: Arc<usize>,
}

impl Resource for Tagged {
    type Value = usize;

    fn get(&self) -> Result<Arc<usize>, BoxError> {
        Ok(self.value.clone())
    }
}

#[derive(Default)]
struct TaggedFactory;

impl ResourceFactory for TaggedFactory {
    type Value = usize;

    fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
        Ok(Box::new(Tagged {
            value: Arc::new(NEXT_ID.fetch_add(1, Ordering::SeqCst)),
        }))
    }
}

const NAMES: [&str; 6] = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];

fn arb_name() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(&NAMES[..])
}

// ---------------------------------------------------------------------------
// Property: single creation per key
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_key_is_created_once_and_shared(
        names in proptest::collection::vec(arb_name(), 1..12),
    ) {
        let manager = LifecycleManager::new();
        let mut observed: Vec<(&str, Arc<usize>)> = Vec::new();

        // Resolve each declared name from two executions, interleaved.
        for round in 0..2 {
            for name in &names {
                let point = InjectionPoint::new(
                    "res",
                    "property_tests::observes",
                    InjectionSpec::shared(
                        FactoryProvider::of::<TaggedFactory>(),
                        *name,
                        Scope::Global,
                    ),
                );
                let file = if round == 0 { "a.rs" } else { "b.rs" };
                let execution = manager.start_execution(file, vec![point.clone()]);
                let value = execution.resolve_as::<usize>(&point).unwrap();
                execution.close().unwrap();
                observed.push((*name, value));
            }
        }

        // Same name, same allocation; different names, different values.
        for (left_name, left) in &observed {
            for (right_name, right) in &observed {
                if left_name == right_name {
                    prop_assert!(Arc::ptr_eq(left, right));
                } else {
                    prop_assert_ne!(**left, **right);
                }
            }
        }

        manager.close_run().unwrap();
    }

    #[test]
    fn concurrent_resolvers_of_one_key_share_one_creation(
        thread_count in 2usize..6,
    ) {
        let manager = LifecycleManager::new();
        let point = InjectionPoint::new(
            "res",
            "property_tests::races",
            InjectionSpec::shared(
                FactoryProvider::of::<TaggedFactory>(),
                "raced",
                Scope::Global,
            ),
        );

        let manager_ref = &manager;
        let point_ref = &point;
        let values: Vec<Arc<usize>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..thread_count)
                .map(|_| {
                    s.spawn(move || {
                        let execution =
                            manager_ref.start_execution("a.rs", vec![point_ref.clone()]);
                        let value = execution.resolve_as::<usize>(point_ref).unwrap();
                        execution.close().unwrap();
                        value
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for value in &values[1..] {
            prop_assert!(Arc::ptr_eq(&values[0], value));
        }

        manager.close_run().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Property: arbitrary overlapping key sets never deadlock
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn overlapping_key_sets_always_complete(
        sets in proptest::collection::vec(
            proptest::collection::vec(0usize..NAMES.len(), 0..4),
            2..6,
        ),
    ) {
        let coordinator = ExclusionCoordinator::new();

        let coordinator_ref = &coordinator;
        std::thread::scope(|s| {
            for set in &sets {
                s.spawn(move || {
                    for _ in 0..10 {
                        let keys: Vec<PermitKey> = set
                            .iter()
                            .map(|&i| PermitKey::global(NAMES[i]))
                            .collect();
                        let _guard = coordinator_ref.acquire(keys);
                    }
                });
            }
        });
        // Completion of the scope is the property: no circular wait.
    }
}
