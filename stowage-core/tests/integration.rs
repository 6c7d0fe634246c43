//! Integration Tests for the Store Runtime
//!
//! These tests verify that definitions, the registry, and store instances
//! work together across execution contexts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use serde_json::{json, Map, Value};
use stowage_core::{
    define_store, ContextId, Error, ExecutionContext, MutationEvent, MutationKind, Registry, Store, StoreDefinition,
    UseStore,
};

fn main_store() -> UseStore {
    define_store(
        StoreDefinition::builder("main")
            .state(|| json!({ "a": { "x": 1, "y": 2 }, "b": 5, "c": 0 }))
            .build()
            .unwrap(),
    )
}

fn record(store: &Store) -> Arc<Mutex<Vec<(MutationEvent, Value)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    store.subscribe(move |event, state| log_clone.lock().push((event.clone(), state.clone())));
    log
}

fn provider_with(entries: Vec<(&'static str, Value)>) -> impl Fn() -> Map<String, Value> + Send + Sync + 'static {
    move || {
        entries
            .iter()
            .map(|(id, state)| (id.to_string(), state.clone()))
            .collect()
    }
}

/// Two contexts get two instances, and mutations do not cross over.
#[test]
fn stores_are_isolated_per_context() {
    let use_main = main_store();
    let (a, b) = (ContextId::new(), ContextId::new());

    let store_a = use_main.get_in(a).unwrap();
    let store_b = use_main.get_in(b).unwrap();
    assert!(!store_a.ptr_eq(&store_b));

    store_a.patch(json!({ "b": 99 })).unwrap();
    assert_eq!(store_a.state()["b"], json!(99));
    assert_eq!(store_b.state()["b"], json!(5));
}

/// Resolving twice in a context returns the identical instance.
#[test]
fn resolution_is_idempotent() {
    let use_main = main_store();
    let context = ContextId::new();

    let first = use_main.get_in(context).unwrap();
    let second = use_main.get().unwrap();
    let third = use_main.get_in(context).unwrap();

    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&third));
}

/// Patching merges nested records and leaves other keys alone.
#[test]
fn patch_is_a_merge_not_a_replace() {
    let store = main_store().get_in(ContextId::new()).unwrap();

    store.patch(json!({ "a": { "x": 9 } })).unwrap();

    assert_eq!(store.state(), json!({ "a": { "x": 9, "y": 2 }, "b": 5, "c": 0 }));
}

/// A patch touching several fields produces one notification carrying the
/// partial object.
#[test]
fn single_notification_per_patch() {
    let store = main_store().get_in(ContextId::new()).unwrap();
    let log = record(&store);

    let partial = json!({ "a": { "y": 3 }, "b": 6, "c": 7 });
    store.patch(partial.clone()).unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0.kind, MutationKind::Patch);
    assert_eq!(log[0].0.store_id, "main");
    assert_eq!(log[0].0.payload, partial);
    assert_eq!(log[0].1, json!({ "a": { "x": 1, "y": 3 }, "b": 6, "c": 7 }));
}

/// Unsubscribing stops one callback; the others keep their order.
#[test]
fn unsubscribe_keeps_remaining_order() {
    let store = main_store().get_in(ContextId::new()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let subscriptions: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|name| {
            let order = order.clone();
            store.subscribe(move |_, _| order.lock().push(name))
        })
        .collect();

    store.patch(json!({ "b": 1 })).unwrap();
    assert!(subscriptions[1].unsubscribe());
    store.patch(json!({ "b": 2 })).unwrap();
    assert!(!subscriptions[1].unsubscribe());

    assert_eq!(
        *order.lock(),
        vec!["first", "second", "third", "first", "third"]
    );
}

/// Reset goes back to the declared default, not the hydrated state, and
/// silences every earlier subscriber.
#[test]
fn reset_discards_subscriptions_and_hydration() {
    let registry = Arc::new(Registry::new());
    let context = ContextId::new();
    registry.set_state_provider_for(context, provider_with(vec![("main", json!({ "hydrated": true }))]));

    let use_main = UseStore::new(main_store().definition().clone(), registry);
    let store = use_main.get_in(context).unwrap();
    assert_eq!(store.state(), json!({ "hydrated": true }));

    let log = record(&store);
    store.reset();
    assert_eq!(store.state(), store.definition().initial_state());

    store.patch(json!({ "b": 1 })).unwrap();
    store.update(|state| state["c"] = json!(1));
    assert!(log.lock().is_empty());
}

/// Getters compute once per dependency change.
#[test]
fn getter_memoization() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let use_counter = define_store(
        StoreDefinition::builder("memo-counter")
            .state(|| json!({ "n": 1 }))
            .getter("double", move |state, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                json!(state["n"].as_i64().unwrap_or(0) * 2)
            })
            .build()
            .unwrap(),
    );
    let store = use_counter.get_in(ContextId::new()).unwrap();

    assert_eq!(store.getter("double").unwrap(), json!(2));
    assert_eq!(store.getter("double").unwrap(), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store.patch(json!({ "n": 4 })).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.getter("double").unwrap(), json!(8));
    assert_eq!(store.getter("double").unwrap(), json!(8));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(matches!(store.getter("triple"), Err(Error::UnknownGetter { .. })));
}

/// A getter can resolve another store of the same context and reacts to it.
#[test]
fn getter_resolves_sibling_store_in_its_context() {
    let use_cart = define_store(
        StoreDefinition::builder("cart")
            .state(|| json!({ "items": [] }))
            .build()
            .unwrap(),
    );
    let cart_accessor = use_cart.clone();
    let use_summary = define_store(
        StoreDefinition::builder("summary")
            .getter("cart_size", move |_, _| match cart_accessor.get() {
                Ok(cart) => json!(cart.state()["items"].as_array().map_or(0, Vec::len)),
                Err(_) => Value::Null,
            })
            .build()
            .unwrap(),
    );

    let (a, b) = (ContextId::new(), ContextId::new());
    let summary_a = use_summary.get_in(a).unwrap();
    use_cart.get_in(b).unwrap().patch(json!({ "items": [1, 2, 3] })).unwrap();

    // The active context is now `b`; the getter still reads `a`'s cart.
    assert_eq!(summary_a.getter("cart_size").unwrap(), json!(0));

    use_cart.get_in(a).unwrap().patch(json!({ "items": ["x"] })).unwrap();
    assert_eq!(summary_a.getter("cart_size").unwrap(), json!(1));
}

/// Actions run in their store's context even after the active one drifted.
#[test]
fn actions_reactivate_their_context() {
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    let use_session = define_store(
        StoreDefinition::builder("session")
            .state(|| json!({ "user": null }))
            .action("login", move |store, args| {
                *seen_clone.lock() = ExecutionContext::active();
                let user = args.first().cloned().unwrap_or(Value::Null);
                store.patch(json!({ "user": user.clone() }))?;
                Ok(user)
            })
            .build()
            .unwrap(),
    );

    let home = ContextId::new();
    let session = use_session.get_in(home).unwrap();
    ExecutionContext::set_active(ContextId::new());

    let result = session.dispatch("login", &[json!("ada")]).unwrap();

    assert_eq!(result, json!("ada"));
    assert_eq!(*seen.lock(), Some(home));
    assert_eq!(session.state(), json!({ "user": "ada" }));
}

/// Without an active context, resolution fails instead of sharing state.
#[test]
fn resolving_without_context_is_an_error() {
    let use_main = main_store();
    let outcome = std::thread::spawn(move || use_main.get().map(|store| store.id().to_string()))
        .join()
        .unwrap();

    assert_eq!(outcome, Err(Error::NoActiveContext { store_id: "main".into() }));
}

/// Each thread serves its own request with its own store instance.
#[test]
fn concurrent_requests_do_not_share_stores() {
    let use_main = main_store();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let use_main = use_main.clone();
            std::thread::spawn(move || {
                ExecutionContext::scope(ContextId::new(), || {
                    let store = use_main.get().unwrap();
                    store.patch(json!({ "b": i })).unwrap();
                    store.state()["b"].clone()
                })
            })
        })
        .collect();

    let results: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![json!(0), json!(1), json!(2), json!(3)]);
}

/// Nested lifecycle scopes restore the outer request's context.
#[test]
fn lifecycle_scopes_nest() {
    let use_main = main_store();
    let (outer, inner) = (ContextId::new(), ContextId::new());

    ExecutionContext::scope(outer, || {
        let outer_store = use_main.get().unwrap();
        let inner_store = ExecutionContext::scope(inner, || use_main.get().unwrap());

        assert_eq!(inner_store.context(), inner);
        assert!(outer_store.ptr_eq(&use_main.get().unwrap()));
    });
}

/// A `null` or missing provider entry falls back to the factory; an empty
/// object is real hydrated state.
#[test]
fn provider_entries_null_missing_and_empty() {
    let registry = Arc::new(Registry::new());
    let definition = main_store().definition().clone();
    let default_state = definition.initial_state();
    let use_main = UseStore::new(definition, registry.clone());

    let (null, missing, empty) = (ContextId::new(), ContextId::new(), ContextId::new());
    registry.set_state_provider_for(null, provider_with(vec![("main", Value::Null)]));
    registry.set_state_provider_for(missing, provider_with(vec![("other", json!({ "x": 1 }))]));
    registry.set_state_provider_for(empty, provider_with(vec![("main", json!({}))]));

    let from_null = use_main.get_in(null).unwrap();
    assert_eq!(from_null.state(), default_state);
    from_null.patch(json!({ "b": 6 })).unwrap();
    assert_eq!(from_null.state()["b"], json!(6));

    assert_eq!(use_main.get_in(missing).unwrap().state(), default_state);
    assert_eq!(use_main.get_in(empty).unwrap().state(), json!({}));
}

/// One store shared by several threads keeps reporting every mutation.
#[test]
fn shared_store_across_threads_drops_no_notifications() {
    let store = main_store().get_in(ContextId::new()).unwrap();
    let log = record(&store);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..25 {
                    if i % 2 == 0 {
                        store.patch(json!({ "a": { "x": t }, "b": i })).unwrap();
                    } else {
                        store.update(|state| state["c"] = json!(t * 1000 + i));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    {
        let log = log.lock();
        let patches = log.iter().filter(|(event, _)| event.kind == MutationKind::Patch).count();
        let direct = log.iter().filter(|(event, _)| event.kind == MutationKind::DirectAssignment).count();
        assert_eq!(patches, 4 * 13);
        assert_eq!(direct, 4 * 12);
    }

    // The watcher is still listening afterwards.
    assert!(store.update(|state| state["c"] = json!(-1)));
    assert_eq!(log.lock().last().map(|(event, _)| event.kind), Some(MutationKind::DirectAssignment));
}

/// A subscriber that panics on an in-place edit does not stop the others.
#[test]
fn panicking_subscriber_on_in_place_edit() {
    let store = main_store().get_in(ContextId::new()).unwrap();
    let before = record(&store);
    store.subscribe(|_, _| panic!("subscriber failure"));
    let after = record(&store);

    assert!(store.update(|state| state["a"]["x"] = json!(10)));
    store.patch(json!({ "b": 1 })).unwrap();

    assert_eq!(before.lock().len(), 2);
    assert_eq!(after.lock().len(), 2);
    assert_eq!(after.lock()[0].1["a"], json!({ "x": 10, "y": 2 }));
}

/// Dispatch hands an action's own error back unchanged.
#[test]
fn action_failure_is_returned_to_the_caller() {
    let use_wallet = define_store(
        StoreDefinition::builder("wallet")
            .state(|| json!({ "balance": 10 }))
            .action("spend", |store, args| {
                let amount = args.first().and_then(Value::as_i64).unwrap_or(0);
                let balance = store.state()["balance"].as_i64().unwrap_or(0);
                if amount > balance {
                    return Err(Error::action("spend", "insufficient balance"));
                }
                store.patch(json!({ "balance": balance - amount }))?;
                Ok(json!(balance - amount))
            })
            .build()
            .unwrap(),
    );
    let wallet = use_wallet.get_in(ContextId::new()).unwrap();

    assert_eq!(wallet.dispatch("spend", &[json!(4)]).unwrap(), json!(6));
    assert_eq!(
        wallet.dispatch("spend", &[json!(7)]),
        Err(Error::Action { action: "spend".into(), reason: "insufficient balance".into() })
    );
    assert_eq!(wallet.state(), json!({ "balance": 6 }));
}
