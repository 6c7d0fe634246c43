//! Store Instance Builder
//!
//! Composes the state cell, the deep patch merger, the mutation notifier,
//! the memoized getters, and the wrapped actions into one [`Store`] handle.
//!
//! # Notification rules
//!
//! - `patch` mutes the state watcher, merges, unmutes, then emits exactly
//!   one `Patch` mutation carrying the partial object.
//! - `update` edits the live state in place; the watcher sees the change
//!   and emits one `DirectAssignment` mutation (nothing if the edit was a
//!   no-op).
//! - `set_state` replaces the root value with the watcher muted, so it
//!   emits nothing. Getters still see the new value.
//! - `reset` drops every subscription first, then restores the declared
//!   default state.
//!
//! Mutations of one instance are serialized by a reentrant writer lock, so
//! handles shared across threads never interleave a mute bracket with
//! another thread's edit. A subscriber may still mutate the store it was
//! notified by.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use serde_json::Value;

use super::definition::StoreDefinition;
use super::getters::Getters;
use super::notifier::{MutationEvent, Notifier, Subscription};
use super::patch::{deep_merge, kind_of};
use crate::context::{ContextId, ExecutionContext};
use crate::devtools::{notify_observer, StoreObserver};
use crate::error::{Error, Result};
use crate::reactive::{Effect, Signal};

/// Where mutations go: the store's subscribers, then the optional observer.
#[derive(Clone)]
struct MutationSink {
    notifier: Notifier,
    observer: Option<Arc<dyn StoreObserver>>,
}

impl MutationSink {
    fn emit(&self, event: &MutationEvent, state: &Value) {
        self.notifier.notify(event, state);

        if let Some(observer) = &self.observer {
            notify_observer(&event.store_id, || observer.mutation(event, state));
        }
    }
}

/// Mutes the state watcher for its lifetime. Brackets stack: the watcher
/// listens again only once every open bracket is closed.
struct Muted<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> Muted<'a> {
    fn new(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self { depth }
    }
}

impl Drop for Muted<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StoreInner {
    definition: Arc<StoreDefinition>,
    context: ContextId,
    state: Signal<Value>,
    mute_depth: Arc<AtomicUsize>,
    writer: ReentrantMutex<()>,
    sink: MutationSink,
    getters: Getters,
    _watcher: Effect,
}

/// A live store: observable state, patch/subscribe/reset, getters and
/// actions, bound to one execution context.
///
/// Cloning is cheap; clones are the same instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Build a store instance.
    ///
    /// The state starts as `hydrated` if given, otherwise as the
    /// definition's initial state. Most callers resolve stores through a
    /// [`Registry`](crate::Registry) instead, which guarantees one instance
    /// per context and id.
    pub fn build(
        definition: Arc<StoreDefinition>,
        context: ContextId,
        hydrated: Option<Value>,
        observer: Option<Arc<dyn StoreObserver>>,
    ) -> Self {
        let is_hydrated = hydrated.is_some();
        let initial = hydrated.unwrap_or_else(|| definition.initial_state());
        let state = Signal::new(initial);
        let mute_depth = Arc::new(AtomicUsize::new(0));
        let sink = MutationSink {
            notifier: Notifier::new(),
            observer,
        };

        let watcher = {
            let state = state.clone();
            let mute_depth = Arc::clone(&mute_depth);
            let sink = sink.clone();
            let id = definition.id().to_string();
            let primed = AtomicBool::new(false);

            Effect::new(move || {
                let current = state.get();
                // The first run only establishes the dependency.
                if !primed.swap(true, Ordering::SeqCst) {
                    return;
                }
                if mute_depth.load(Ordering::SeqCst) == 0 {
                    sink.emit(&MutationEvent::direct(id.as_str()), &current);
                }
            })
        };

        let getters = Getters::install(&state, definition.getters(), context);

        tracing::debug!(store = definition.id(), context = %context, hydrated = is_hydrated, "store built");

        Self {
            inner: Arc::new(StoreInner {
                definition,
                context,
                state,
                mute_depth,
                writer: ReentrantMutex::new(()),
                sink,
                getters,
                _watcher: watcher,
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.definition.id()
    }

    /// The execution context this instance belongs to.
    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    pub fn definition(&self) -> &Arc<StoreDefinition> {
        &self.inner.definition
    }

    /// Snapshot of the live state.
    ///
    /// Inside a getter or effect the read is tracked.
    pub fn state(&self) -> Value {
        self.inner.state.get()
    }

    /// Borrow the live state. `f` must not mutate this store.
    pub fn with_state<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.inner.state.with(f)
    }

    /// Replace the whole state without notifying subscribers.
    pub fn set_state(&self, state: Value) {
        let _write = self.inner.writer.lock();
        let _muted = Muted::new(&self.inner.mute_depth);
        self.inner.state.set(state);
    }

    /// Edit the live state in place.
    ///
    /// Subscribers get one `DirectAssignment` mutation if the value actually
    /// changed. Returns whether it did.
    pub fn update(&self, f: impl FnOnce(&mut Value)) -> bool {
        let _write = self.inner.writer.lock();
        self.inner.state.modify(f)
    }

    /// Deep-merge `partial` into the state and notify subscribers once.
    ///
    /// `partial` must be an object, and so must the current state.
    pub fn patch(&self, partial: Value) -> Result<()> {
        let Value::Object(fields) = &partial else {
            return Err(Error::InvalidPatch {
                store_id: self.id().to_string(),
                found: kind_of(&partial),
            });
        };

        let mut outcome = Ok(());
        let snapshot = {
            let _write = self.inner.writer.lock();
            {
                let _muted = Muted::new(&self.inner.mute_depth);
                self.inner.state.modify(|state| match state {
                    Value::Object(target) => {
                        deep_merge(target, fields);
                    }
                    other => {
                        outcome = Err(Error::InvalidPatch {
                            store_id: self.id().to_string(),
                            found: kind_of(other),
                        });
                    }
                });
            }
            self.inner.state.get_untracked()
        };
        outcome?;

        self.inner.sink.emit(&MutationEvent::patch(self.id(), partial), &snapshot);
        Ok(())
    }

    /// Register a mutation callback.
    ///
    /// A callback that needs this store should capture
    /// [`Store::downgrade`], not a clone: the store owns its callbacks, so a
    /// strong handle inside one keeps the store alive forever.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MutationEvent, &Value) + Send + Sync + 'static,
    {
        self.inner.sink.notifier.subscribe(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sink.notifier.len()
    }

    /// Drop every subscription and restore the declared initial state.
    ///
    /// Hydrated state is ignored here: reset always goes back to the
    /// definition's default.
    pub fn reset(&self) {
        let _write = self.inner.writer.lock();
        self.inner.sink.notifier.clear();
        self.inner.state.set(self.inner.definition.initial_state());
        tracing::debug!(store = self.id(), context = %self.inner.context, "store reset");
    }

    /// Read a getter.
    pub fn getter(&self, name: &str) -> Result<Value> {
        self.inner.getters.get(name).ok_or_else(|| Error::UnknownGetter {
            store_id: self.id().to_string(),
            name: name.to_string(),
        })
    }

    pub fn getters(&self) -> &Getters {
        &self.inner.getters
    }

    /// Getter names in declaration order.
    pub fn getter_names(&self) -> Vec<String> {
        self.inner.getters.names()
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> Vec<String> {
        self.inner.definition.action_names().map(str::to_string).collect()
    }

    /// Run an action with this store as its receiver.
    ///
    /// The store's execution context is re-activated first, so the action
    /// resolves sibling stores from the right context even if the active
    /// one drifted in between.
    pub fn dispatch(&self, action: &str, args: &[Value]) -> Result<Value> {
        let body = self
            .inner
            .definition
            .action(action)
            .ok_or_else(|| Error::UnknownAction {
                store_id: self.id().to_string(),
                name: action.to_string(),
            })?;

        ExecutionContext::set_active(self.inner.context);
        body(self, args)
    }

    /// Whether two handles point at the same instance.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the store alive.
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning store handle, see [`Store::downgrade`].
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    /// The store, unless every owning handle is gone.
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id())
            .field("context", &self.inner.context)
            .field("subscribers", &self.subscriber_count())
            .field("getters", &self.inner.getters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MutationKind;
    use parking_lot::Mutex;
    use serde_json::json;

    fn counter() -> Arc<StoreDefinition> {
        Arc::new(
            StoreDefinition::builder("counter")
                .state(|| json!({ "n": 0, "meta": { "label": "c", "tags": ["a"] } }))
                .getter("double", |state, _| json!(state["n"].as_i64().unwrap_or(0) * 2))
                .action("increment", |store, args| {
                    let by = args.first().and_then(Value::as_i64).unwrap_or(1);
                    let n = store.state()["n"].as_i64().unwrap_or(0);
                    store.patch(json!({ "n": n + by }))?;
                    Ok(json!(n + by))
                })
                .build()
                .unwrap(),
        )
    }

    fn record(store: &Store) -> (Subscription, Arc<Mutex<Vec<(MutationEvent, Value)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let sub = store.subscribe(move |event, state| log_clone.lock().push((event.clone(), state.clone())));
        (sub, log)
    }

    #[test]
    fn hydrated_state_wins_over_factory() {
        let store = Store::build(counter(), ContextId::new(), Some(json!({ "n": 41 })), None);
        assert_eq!(store.state(), json!({ "n": 41 }));
    }

    #[test]
    fn patch_notifies_once_with_partial_payload() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let (_sub, log) = record(&store);

        store
            .patch(json!({ "n": 3, "meta": { "label": "x", "tags": [] } }))
            .unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0.kind, MutationKind::Patch);
        assert_eq!(log[0].0.payload, json!({ "n": 3, "meta": { "label": "x", "tags": [] } }));
        assert_eq!(log[0].1, json!({ "n": 3, "meta": { "label": "x", "tags": [] } }));
    }

    #[test]
    fn patch_rejects_non_objects() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let err = store.patch(json!([1, 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidPatch { found: "array", .. }));

        store.set_state(json!(5));
        let err = store.patch(json!({ "n": 1 })).unwrap_err();
        assert!(matches!(err, Error::InvalidPatch { found: "number", .. }));
    }

    #[test]
    fn in_place_update_emits_direct_assignment() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let (_sub, log) = record(&store);

        assert!(store.update(|state| state["meta"]["label"] = json!("renamed")));
        assert!(!store.update(|state| state["n"] = json!(0)));

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, MutationEvent::direct("counter"));
        assert_eq!(log[0].1["meta"]["label"], json!("renamed"));
    }

    #[test]
    fn set_state_is_silent_but_visible() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let (_sub, log) = record(&store);

        assert_eq!(store.getter("double").unwrap(), json!(0));
        store.set_state(json!({ "n": 21 }));

        assert!(log.lock().is_empty());
        assert_eq!(store.getter("double").unwrap(), json!(42));
    }

    #[test]
    fn reset_restores_default_and_drops_subscribers() {
        let store = Store::build(counter(), ContextId::new(), Some(json!({ "n": 9 })), None);
        let (sub, log) = record(&store);

        store.reset();
        assert_eq!(store.state(), counter().initial_state());
        assert_eq!(store.subscriber_count(), 0);
        assert!(!sub.unsubscribe());

        store.patch(json!({ "n": 1 })).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn dispatch_runs_action_in_store_context() {
        let context = ContextId::new();
        let store = Store::build(counter(), context, None, None);
        ExecutionContext::clear();

        assert_eq!(store.dispatch("increment", &[json!(5)]).unwrap(), json!(5));
        assert_eq!(store.state()["n"], json!(5));
        assert_eq!(ExecutionContext::active(), Some(context));
        ExecutionContext::clear();

        let err = store.dispatch("missing", &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownAction { .. }));
    }

    #[test]
    fn names_are_listed_in_declaration_order() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        assert_eq!(store.getter_names(), vec!["double"]);
        assert_eq!(store.action_names(), vec!["increment"]);
    }

    #[test]
    fn subscriber_may_patch_without_deadlock() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let handle = store.downgrade();
        store.subscribe(move |event, state| {
            if event.kind == MutationKind::Patch && state["n"] == json!(1) {
                if let Some(store) = handle.upgrade() {
                    store.patch(json!({ "n": 2 })).unwrap();
                }
            }
        });

        store.patch(json!({ "n": 1 })).unwrap();
        assert_eq!(store.state()["n"], json!(2));
    }

    #[test]
    fn subscriber_may_patch_during_in_place_update() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let handle = store.downgrade();
        store.subscribe(move |event, _| {
            if event.kind == MutationKind::DirectAssignment {
                if let Some(store) = handle.upgrade() {
                    store.patch(json!({ "meta": { "label": "seen" } })).unwrap();
                }
            }
        });
        let (_sub, log) = record(&store);

        assert!(store.update(|state| state["n"] = json!(3)));

        let kinds: Vec<MutationKind> = log.lock().iter().map(|(event, _)| event.kind).collect();
        assert_eq!(kinds, vec![MutationKind::Patch, MutationKind::DirectAssignment]);
        assert_eq!(store.state()["meta"]["label"], json!("seen"));

        // The nested bracket closed: in-place edits are reported again.
        assert!(store.update(|state| state["n"] = json!(4)));
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn weak_handle_does_not_keep_store_alive() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        let weak = store.downgrade();
        assert!(weak.upgrade().is_some_and(|s| s.ptr_eq(&store)));

        drop(store);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_patches_leave_watcher_listening() {
        let store = Store::build(counter(), ContextId::new(), None, None);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        store.patch(json!({ "n": t * 100 + i })).unwrap();
                        store.set_state(json!({ "n": 0 }));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (_sub, log) = record(&store);
        assert!(store.update(|state| state["n"] = json!(-1)));
        assert_eq!(log.lock().len(), 1);
        assert_eq!(log.lock()[0].0.kind, MutationKind::DirectAssignment);
    }

    #[test]
    fn subscriber_panic_on_in_place_update_is_contained() {
        let store = Store::build(counter(), ContextId::new(), None, None);
        store.subscribe(|_, _| panic!("subscriber failure"));
        let (_sub, log) = record(&store);

        assert!(store.update(|state| state["n"] = json!(1)));
        assert_eq!(log.lock().len(), 1);

        // The watcher still runs on the next edit.
        assert!(store.update(|state| state["n"] = json!(2)));
        assert_eq!(log.lock().len(), 2);
        assert_eq!(store.getter("double").unwrap(), json!(4));
    }

    #[test]
    fn action_errors_reach_the_caller() {
        let definition = Arc::new(
            StoreDefinition::builder("guarded")
                .action("withdraw", |store, args| {
                    let amount = args.first().and_then(Value::as_i64).unwrap_or(0);
                    if amount <= 0 {
                        return Err(Error::action("withdraw", "amount must be positive"));
                    }
                    store.patch(json!({ "last": amount }))?;
                    Ok(json!(amount))
                })
                .build()
                .unwrap(),
        );
        let store = Store::build(definition, ContextId::new(), None, None);

        let err = store.dispatch("withdraw", &[json!(0)]).unwrap_err();
        assert_eq!(err, Error::action("withdraw", "amount must be positive"));
        assert_eq!(store.state(), json!({}));
        assert_eq!(store.dispatch("withdraw", &[json!(5)]).unwrap(), json!(5));
    }
}
