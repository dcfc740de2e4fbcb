//! Integration tests for deferred release through pool stacks.

use proptest::prelude::*;
use retainer_core::{LifetimeConfig, LifetimeError, ObjectRef, Registry};
use retainer_pool::{DeferredRelease, PoolState, ThreadContext};
use std::sync::{Arc, Mutex};

fn reporting_registry() -> Registry {
    let _ = env_logger::builder().is_test(true).try_init();
    Registry::new(LifetimeConfig::reporting())
}

/// Creates an object whose release hook appends `label` to `log`.
fn logged(
    registry: &Registry,
    log: &Arc<Mutex<Vec<&'static str>>>,
    label: &'static str,
) -> ObjectRef<&'static str> {
    let log = Arc::clone(log);
    registry.create_with_hook(label, move |label| log.lock().unwrap().push(*label))
}

#[test]
fn test_scenario_object_outlives_deferral_until_sweep() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));

    let object = logged(&registry, &log, "O");
    assert_eq!(object.retain_count(), 1);

    let pool_a = context.push_pool();
    object.release_deferred(&mut context).unwrap();
    assert_eq!(object.retain_count(), 1);

    // Still usable after the caller gave up its reference.
    assert_eq!(*object.payload().unwrap(), "O");
    assert!(log.lock().unwrap().is_empty());

    context.destroy_pool(pool_a).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["O"]);
    assert_eq!(object.retain_count(), 0);
    assert!(object.is_released());
}

#[test]
fn test_destroying_pool_twice_is_rejected() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));

    let pool = context.push_pool();
    logged(&registry, &log, "once").release_deferred(&mut context).unwrap();

    let report = context.destroy_pool(pool).unwrap();
    assert_eq!(report.objects_finalized(), 1);
    assert_eq!(
        context.destroy_pool(pool),
        Err(LifetimeError::stale(pool.id()))
    );
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn test_double_registration_after_retain_leaves_one_owner() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));
    let object = logged(&registry, &log, "twice");

    object.retain().unwrap();
    let pool = context.push_pool();
    object.release_deferred(&mut context).unwrap();
    object.release_deferred(&mut context).unwrap();
    assert_eq!(context.stack().get(pool).unwrap().len(), 2);

    context.destroy_pool(pool).unwrap();
    assert_eq!(object.retain_count(), 1);
    assert!(!object.is_released());
    assert!(log.lock().unwrap().is_empty());

    object.release().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["twice"]);
}

#[test]
fn test_cascade_sweeps_top_to_bottom() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));

    let base = context.push_pool();
    let p = context.push_pool();
    logged(&registry, &log, "p1").release_deferred(&mut context).unwrap();
    logged(&registry, &log, "p2").release_deferred(&mut context).unwrap();
    let q = context.push_pool();
    logged(&registry, &log, "q").release_deferred(&mut context).unwrap();
    let r = context.push_pool();
    logged(&registry, &log, "r1").release_deferred(&mut context).unwrap();
    logged(&registry, &log, "r2").release_deferred(&mut context).unwrap();

    let report = context.destroy_pool(p).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["r1", "r2", "q", "p1", "p2"]);
    assert_eq!(report.pools, vec![r.id(), q.id(), p.id()]);
    assert_eq!(report.entries_swept, 5);
    assert_eq!(context.current_pool().unwrap(), base);
    for handle in [p, q, r] {
        assert_eq!(context.stack().state_of(handle), Some(PoolState::Destroyed));
    }

    context.destroy_pool(base).unwrap();
    assert_eq!(context.current_pool(), Err(LifetimeError::NoActivePool));
}

#[test]
fn test_registration_into_destroyed_pool_is_dangling() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let object = registry.create(0u8);

    let outer = context.push_pool();
    let inner = context.push_pool();
    context.destroy_pool(inner).unwrap();

    let result = context.stack_mut().register(inner, object.as_release());
    assert_eq!(result, Err(LifetimeError::dangling(inner.id())));

    // The surviving pool still works.
    context.stack_mut().register(outer, object.as_release()).unwrap();
    context.destroy_pool(outer).unwrap();
    assert!(object.is_released());
}

#[test]
fn test_sweeping_over_released_object_is_double_release() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));
    let object = logged(&registry, &log, "over");
    let bystander = logged(&registry, &log, "bystander");

    let pool = context.push_pool();
    object.release_deferred(&mut context).unwrap();
    bystander.release_deferred(&mut context).unwrap();
    object.release().unwrap();

    let result = context.destroy_pool(pool);
    assert_eq!(result, Err(LifetimeError::double_release(object.id())));
    // The rest of the pool is still swept.
    assert!(bystander.is_released());
    assert!(context.stack().is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["over", "bystander"]);
}

#[test]
fn test_deferring_released_object_is_use_after_release() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let object = registry.create(0u8);
    context.push_pool();
    object.release().unwrap();

    assert!(matches!(
        object.release_deferred(&mut context),
        Err(LifetimeError::UseAfterRelease { .. })
    ));
    assert_eq!(context.stack().pending(), 0);
}

#[test]
fn test_nested_with_pool_sweeps_inner_first() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));

    context
        .with_pool(|context| {
            logged(&registry, &log, "outer").release_deferred(context).unwrap();
            context
                .with_pool(|context| {
                    logged(&registry, &log, "inner").release_deferred(context).unwrap();
                })
                .unwrap();
            assert_eq!(*log.lock().unwrap(), vec!["inner"]);
        })
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
}

#[test]
fn test_with_pool_reclaims_forgotten_inner_pool() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let object = registry.create(0u8);

    context
        .with_pool(|context| {
            context.push_pool();
            object.release_deferred(context).unwrap();
        })
        .unwrap();

    assert!(object.is_released());
    assert!(context.stack().is_empty());
}

#[test]
fn test_contexts_are_independent() {
    let registry = reporting_registry();
    let mut first = ThreadContext::new(&registry);
    let mut second = ThreadContext::new(&registry);
    let object = registry.create(0u8);
    object.retain().unwrap();

    let a = first.push_pool();
    let b = second.push_pool();
    object.release_deferred(&mut first).unwrap();
    object.release_deferred(&mut second).unwrap();

    assert_eq!(second.destroy_pool(a), Err(LifetimeError::stale(a.id())));
    second.destroy_pool(b).unwrap();
    assert_eq!(object.retain_count(), 1);
    first.destroy_pool(a).unwrap();
    assert!(object.is_released());
}

#[test]
fn test_handle_from_another_registry_is_stale() {
    let first_registry = reporting_registry();
    let second_registry = reporting_registry();
    let mut first = ThreadContext::new(&first_registry);
    let mut second = ThreadContext::new(&second_registry);

    let a = first.push_pool();
    let b = second.push_pool();
    assert_ne!(a.id(), b.id());

    let bystander = second_registry.create(0u8);
    bystander.release_deferred(&mut second).unwrap();

    assert_eq!(second.destroy_pool(a), Err(LifetimeError::stale(a.id())));
    assert!(!bystander.is_released());
    assert_eq!(second.stack().depth(), 1);

    first.destroy_pool(a).unwrap();
    second.destroy_pool(b).unwrap();
    assert!(bystander.is_released());
}

#[test]
fn test_deferral_into_buried_pool_is_rejected() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let object = registry.create(0u8);

    let lower = context.push_pool();
    let upper = context.push_pool();

    assert_eq!(
        context.stack_mut().register(lower, object.as_release()),
        Err(LifetimeError::not_top(lower.id()))
    );
    object.release_deferred(&mut context).unwrap();
    assert_eq!(context.stack().get(upper).unwrap().len(), 1);
    assert!(context.stack().get(lower).unwrap().is_empty());

    context.destroy_pool(lower).unwrap();
    assert!(object.is_released());
}

#[test]
fn test_destroy_with_report_under_reporting_policy() {
    let registry = reporting_registry();
    let mut context = ThreadContext::new(&registry);
    let log = Arc::new(Mutex::new(Vec::new()));

    let base = context.push_pool();
    logged(&registry, &log, "kept").release_deferred(&mut context).unwrap();
    context.push_pool();
    let over = logged(&registry, &log, "over");
    over.release_deferred(&mut context).unwrap();
    over.release().unwrap();

    let report = context.destroy_pool_with_report(base).unwrap();

    assert_eq!(report.pools_destroyed(), 2);
    assert_eq!(report.violations, vec![LifetimeError::double_release(over.id())]);
    assert_eq!(report.objects_finalized(), 1);
    assert_eq!(*log.lock().unwrap(), vec!["over", "kept"]);
    assert!(context.stack().is_empty());
}

#[test]
fn test_one_context_per_thread() {
    let registry = reporting_registry();
    let shared = registry.create(0u64);
    let threads = 4;
    for _ in 0..threads {
        shared.retain().unwrap();
    }

    std::thread::scope(|scope| {
        for _ in 0..threads {
            let registry = registry.clone();
            let shared = shared.clone();
            scope.spawn(move || {
                let mut context = ThreadContext::new(&registry);
                context
                    .with_pool(|context| {
                        for _ in 0..100 {
                            shared.retain().unwrap().release_deferred(context).unwrap();
                        }
                        shared.release_deferred(context).unwrap();
                    })
                    .unwrap();
            });
        }
    });

    assert_eq!(shared.retain_count(), 1);
    shared.release().unwrap();
    assert_eq!(registry.live_objects(), 0);
}

#[test]
#[should_panic(expected = "ownership violation")]
fn test_default_policy_aborts_without_pool() {
    let registry = Registry::default();
    let mut context = ThreadContext::new(&registry);
    let object = registry.create(0u8);
    let _ = object.release_deferred(&mut context);
}

#[test]
#[should_panic(expected = "ownership violation")]
fn test_default_policy_aborts_on_stale_destroy() {
    let registry = Registry::default();
    let mut context = ThreadContext::new(&registry);
    let pool = context.push_pool();
    context.destroy_pool(pool).unwrap();
    let _ = context.destroy_pool(pool);
}

proptest! {
    /// Every registration is one decrement, regardless of interleaving with retains.
    #[test]
    fn prop_sweep_applies_one_decrement_per_registration(extra in 0usize..8, deferred in 0usize..8) {
        let registry = Registry::new(LifetimeConfig::reporting());
        let mut context = ThreadContext::new(&registry);
        let object = registry.create(());
        for _ in 0..extra {
            object.retain().unwrap();
        }
        let owners = extra + 1;
        let deferred = deferred.min(owners);

        let pool = context.push_pool();
        for _ in 0..deferred {
            object.release_deferred(&mut context).unwrap();
        }
        prop_assert_eq!(object.retain_count(), owners);

        let report = context.destroy_pool(pool).unwrap();
        prop_assert_eq!(report.entries_swept, deferred);
        prop_assert_eq!(object.retain_count(), owners - deferred);
        prop_assert_eq!(object.is_released(), owners == deferred);
        prop_assert_eq!(report.objects_finalized(), usize::from(owners == deferred));
    }
}
