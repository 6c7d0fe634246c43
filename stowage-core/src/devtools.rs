//! Debugging bridge.
//!
//! An optional [`StoreObserver`] attached to a [`Registry`](crate::Registry)
//! is told about every store built afterwards and about every mutation on
//! those stores. It can also push state back in (time travel) through the
//! store handle it was given.
//!
//! [`Inspector`] is a ready-made observer that mirrors the stores' state
//! under their ids and keeps a log of labelled mutations, the way an
//! external state inspector would.
//!
//! Observer hooks are contained: a hook that panics is logged and ignored,
//! and the mutation that triggered it still completes.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::reactive::ReactiveContext;
use crate::store::{MutationEvent, Store, WeakStore};

/// Receives store lifecycle and mutation events.
pub trait StoreObserver: Send + Sync {
    /// Called once, right after a store's first construction in a context.
    fn store_installed(&self, store: &Store) {
        let _ = store;
    }

    /// Called after every mutation, with the post-mutation state.
    fn mutation(&self, event: &MutationEvent, state: &Value) {
        let _ = (event, state);
    }
}

/// Run one observer hook untracked, containing any panic it raises.
pub(crate) fn notify_observer(store_id: &str, hook: impl FnOnce()) {
    let outcome = ReactiveContext::untracked(|| panic::catch_unwind(AssertUnwindSafe(hook)));
    if outcome.is_err() {
        tracing::warn!(store = store_id, "store observer panicked, ignoring");
    }
}

/// One entry of the inspector's mutation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedMutation {
    /// Inspector label, e.g. `[cart] patch`.
    pub label: String,
    pub event: MutationEvent,
    /// Mirrored root state right after the mutation.
    pub root_state: Value,
}

/// Mirrors installed stores and records their mutations.
///
/// Stores are keyed by id only, so the inspector is meant for a single
/// context (a client-side app); a second store with the same id replaces
/// the first. Stores are held weakly: once a store is dropped (for example
/// after its context is disposed) the inspector forgets it.
#[derive(Default)]
pub struct Inspector {
    stores: Mutex<IndexMap<String, WeakStore>>,
    root: Mutex<Map<String, Value>>,
    log: Mutex<Vec<LoggedMutation>>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored state of every installed store.
    pub fn root_state(&self) -> Map<String, Value> {
        self.live_stores();
        self.root.lock().clone()
    }

    pub fn mutations(&self) -> Vec<LoggedMutation> {
        self.log.lock().clone()
    }

    pub fn store_ids(&self) -> Vec<String> {
        self.live_stores().iter().map(|store| store.id().to_string()).collect()
    }

    /// Upgrade the tracked stores, forgetting the ones that were dropped.
    fn live_stores(&self) -> Vec<Store> {
        let mut stores = self.stores.lock();
        let mut root = self.root.lock();
        let mut live = Vec::with_capacity(stores.len());

        stores.retain(|id, weak| match weak.upgrade() {
            Some(store) => {
                live.push(store);
                true
            }
            None => {
                root.remove(id);
                false
            }
        });
        live
    }

    /// Push externally-authored state into the installed stores.
    ///
    /// Each store named in `target` has its state replaced silently.
    /// Returns how many stores were replaced.
    pub fn travel_to_state(&self, target: &Map<String, Value>) -> usize {
        let mut replaced = 0;

        for store in self.live_stores() {
            if let Some(state) = target.get(store.id()) {
                store.set_state(state.clone());
                self.root.lock().insert(store.id().to_string(), state.clone());
                replaced += 1;
            }
        }
        tracing::debug!(stores = replaced, "inspector travelled to state");
        replaced
    }
}

impl StoreObserver for Inspector {
    fn store_installed(&self, store: &Store) {
        self.root
            .lock()
            .insert(store.id().to_string(), store.with_state(Value::clone));
        self.stores.lock().insert(store.id().to_string(), store.downgrade());
    }

    fn mutation(&self, event: &MutationEvent, state: &Value) {
        let root_state = {
            let mut root = self.root.lock();
            root.insert(event.store_id.clone(), state.clone());
            Value::Object(root.clone())
        };

        self.log.lock().push(LoggedMutation {
            label: event.label(),
            event: event.clone(),
            root_state,
        });
    }
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspector")
            .field("stores", &self.store_ids())
            .field("mutations", &self.log.lock().len())
            .finish()
    }
}
