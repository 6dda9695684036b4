//! Creation, access, contract, and teardown failures: each fails the right
//! party — the requesting execution for creation/access, the owning scope
//! boundary for teardown.

use std::error::Error as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fixture_resource::{
    BoxError, Error, FactoryProvider, InjectionPoint, InjectionSpec, LifecycleManager, Resource,
    ResourceFactory, Scope,
};

// ---------------------------------------------------------------------------
// Test factories
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExplodingFactory;

impl ResourceFactory for ExplodingFactory {
    type Value = usize;

    fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
        Err("boom".into())
    }
}

struct Working {
    value: Arc<usize>,
}

impl Resource for Working {
    type Value = usize;

    fn get(&self) -> Result<Arc<usize>, BoxError> {
        Ok(self.value.clone())
    }
}

#[derive(Default)]
struct WorkingFactory;

impl ResourceFactory for WorkingFactory {
    type Value = usize;

    fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
        Ok(Box::new(Working {
            value: Arc::new(42),
        }))
    }
}

struct Unreadable;

impl Resource for Unreadable {
    type Value = usize;

    fn get(&self) -> Result<Arc<usize>, BoxError> {
        Err("no contents".into())
    }
}

#[derive(Default)]
struct UnreadableFactory;

impl ResourceFactory for UnreadableFactory {
    type Value = usize;

    fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
        Ok(Box::new(Unreadable))
    }
}

struct FlakyClose {
    value: Arc<usize>,
}

impl Resource for FlakyClose {
    type Value = usize;

    fn get(&self) -> Result<Arc<usize>, BoxError> {
        Ok(self.value.clone())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        Err("disk on fire".into())
    }
}

#[derive(Default)]
struct FlakyCloseFactory;

impl ResourceFactory for FlakyCloseFactory {
    type Value = usize;

    fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
        Ok(Box::new(FlakyClose {
            value: Arc::new(0),
        }))
    }
}

// ---------------------------------------------------------------------------
// Creation failures
// ---------------------------------------------------------------------------

#[test]
fn a_creation_failure_names_the_factory_and_keeps_the_cause() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "failure_tests::wants_exploding",
        InjectionSpec::fresh(FactoryProvider::of::<ExplodingFactory>(), Vec::<String>::new()),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    let err = execution.resolve(&point).unwrap_err();
    match &err {
        Error::Creation { factory, source } => {
            assert!(factory.contains("ExplodingFactory"));
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("expected a creation failure, got {other:?}"),
    }
    assert!(err.to_string().contains("Unable to create a resource from"));
    assert_eq!(err.source().unwrap().to_string(), "boom");
    execution.close().unwrap();
}

#[test]
fn every_consumer_of_a_failed_shared_creation_observes_the_cause() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "failure_tests::wants_shared_exploding",
        InjectionSpec::shared(
            FactoryProvider::of::<ExplodingFactory>(),
            "shared-boom",
            Scope::Global,
        ),
    );

    // The first resolver triggers the creation; every later one observes
    // the same terminal failure without a second create attempt.
    for file in ["a.rs", "b.rs"] {
        let execution = manager.start_execution(file, vec![point.clone()]);
        let err = execution.resolve(&point).unwrap_err();
        match err {
            Error::Creation { factory, source } => {
                assert!(factory.contains("ExplodingFactory"));
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected a creation failure, got {other:?}"),
        }
        execution.close().unwrap();
    }
    manager.close_run().unwrap();
}

// ---------------------------------------------------------------------------
// Access and contract failures
// ---------------------------------------------------------------------------

#[test]
fn an_access_failure_names_the_originating_factory() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "failure_tests::wants_unreadable",
        InjectionSpec::fresh(FactoryProvider::of::<UnreadableFactory>(), Vec::<String>::new()),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    let err = execution.resolve(&point).unwrap_err();
    match err {
        Error::Access { factory, source } => {
            assert!(factory.contains("UnreadableFactory"));
            assert_eq!(source.to_string(), "no contents");
        }
        other => panic!("expected an access failure, got {other:?}"),
    }
    execution.close().unwrap();
}

#[test]
fn a_wrongly_typed_request_is_a_contract_violation() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "failure_tests::wants_wrong_type",
        InjectionSpec::fresh(FactoryProvider::of::<WorkingFactory>(), Vec::<String>::new()),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    let err = execution.resolve_as::<String>(&point).unwrap_err();
    match err {
        Error::Contract { factory, message } => {
            assert!(factory.contains("WorkingFactory"));
            assert!(message.contains("requested type"));
        }
        other => panic!("expected a contract violation, got {other:?}"),
    }
    execution.close().unwrap();
}

// ---------------------------------------------------------------------------
// Teardown failures escalate to the owning boundary
// ---------------------------------------------------------------------------

#[test]
fn a_file_resource_close_failure_fails_the_container_not_the_test() {
    let manager = LifecycleManager::new();
    let file = "flaky_close_tests.rs";
    manager.retain_source_file(file);

    let point = InjectionPoint::new(
        "res",
        "flaky_close_tests::passes",
        InjectionSpec::shared(
            FactoryProvider::of::<FlakyCloseFactory>(),
            "flaky",
            Scope::SourceFile,
        ),
    );

    let execution = manager.start_execution(file, vec![point.clone()]);
    let value = execution.resolve_as::<usize>(&point).unwrap();
    assert_eq!(*value, 0);

    // The test itself passes: its own boundary closes cleanly.
    execution.close().unwrap();

    // The container boundary reports the teardown failure.
    let err = manager.release_source_file(file).unwrap_err();
    match &err {
        Error::Teardown { scope, source, .. } => {
            assert!(scope.contains(file));
            assert_eq!(source.to_string(), "disk on fire");
        }
        other => panic!("expected a teardown failure, got {other:?}"),
    }
    assert!(!err.is_execution_local());

    manager.close_run().unwrap();
}

#[test]
fn a_global_resource_close_failure_fails_the_run_boundary() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "flaky_close_tests::global_passes",
        InjectionSpec::shared(
            FactoryProvider::of::<FlakyCloseFactory>(),
            "flaky-global",
            Scope::Global,
        ),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    execution.resolve(&point).unwrap();
    execution.close().unwrap();

    let err = manager.close_run().unwrap_err();
    assert!(matches!(err, Error::Teardown { .. }));

    // The boundary fired once; the store does not close twice.
    manager.close_run().unwrap();
}

#[test]
fn a_fresh_resource_close_failure_fails_its_own_execution_boundary() {
    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "flaky_close_tests::fresh",
        InjectionSpec::fresh(FactoryProvider::of::<FlakyCloseFactory>(), Vec::<String>::new()),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    execution.resolve(&point).unwrap();
    let err = execution.close().unwrap_err();
    match err {
        Error::Teardown { scope, source, .. } => {
            assert_eq!(scope, "execution");
            assert_eq!(source.to_string(), "disk on fire");
        }
        other => panic!("expected a teardown failure, got {other:?}"),
    }
}

#[test]
fn teardown_continues_past_the_first_failure() {
    #[derive(Default)]
    struct MixedClose;

    static CREATED: AtomicUsize = AtomicUsize::new(0);
    static CLOSED_CLEANLY: AtomicUsize = AtomicUsize::new(0);

    struct MixedResource {
        fails: bool,
        value: Arc<usize>,
    }

    impl Resource for MixedResource {
        type Value = usize;
        fn get(&self) -> Result<Arc<usize>, BoxError> {
            Ok(self.value.clone())
        }
        fn close(&mut self) -> Result<(), BoxError> {
            if self.fails {
                Err("bad close".into())
            } else {
                CLOSED_CLEANLY.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    impl ResourceFactory for MixedClose {
        type Value = usize;

        fn create(&mut self, _args: &[String]) -> Result<Box<dyn Resource<Value = usize>>, BoxError> {
            let id = CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MixedResource {
                // The last-created resource fails, so the failure comes
                // first during reverse-order teardown.
                fails: id == 2,
                value: Arc::new(id),
            }))
        }
    }

    let manager = LifecycleManager::new();
    let point = InjectionPoint::new(
        "res",
        "flaky_close_tests::mixed",
        InjectionSpec::fresh(FactoryProvider::of::<MixedClose>(), Vec::<String>::new()),
    );

    let execution = manager.start_execution("a.rs", vec![point.clone()]);
    for _ in 0..3 {
        execution.resolve(&point).unwrap();
    }
    let err = execution.close().unwrap_err();
    assert!(matches!(err, Error::Teardown { .. }));

    // The two healthy resources were still closed.
    assert_eq!(CLOSED_CLEANLY.load(Ordering::SeqCst), 2);
}
