//! Execution-Context Registry
//!
//! Maps each execution context to its own collection of store instances,
//! keyed by store id. There is at most one instance per (context, id):
//! resolving the same definition twice in a context returns the same
//! handle, and two contexts never share an instance.
//!
//! The backing table is shared process-wide (a `DashMap` keyed by context),
//! but every operation only ever touches the entry of one context.
//!
//! No table lock is held while user code runs: state providers, state
//! factories, and observers are called with the entry released.

use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::handle::{ContextId, ExecutionContext};
use crate::devtools::{notify_observer, StoreObserver};
use crate::error::{Error, Result};
use crate::store::{Store, StoreDefinition};

/// Supplies pre-hydrated state, keyed by store id, for one context.
pub type StateProvider = Arc<dyn Fn() -> Map<String, Value> + Send + Sync>;

#[derive(Default)]
struct ContextEntry {
    stores: IndexMap<String, Store>,
    provider: Option<StateProvider>,
}

/// Per-context store collections.
#[derive(Default)]
pub struct Registry {
    contexts: DashMap<ContextId, ContextEntry>,
    observer: RwLock<Option<Arc<dyn StoreObserver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry `define_store` resolves against.
    pub fn global() -> &'static Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new()))
    }

    /// Attach a debugging observer. Only stores built afterwards report to it.
    pub fn set_observer(&self, observer: Arc<dyn StoreObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn clear_observer(&self) {
        *self.observer.write() = None;
    }

    /// Register the initial-state provider for the active context.
    pub fn set_state_provider<F>(&self, provider: F) -> Result<()>
    where
        F: Fn() -> Map<String, Value> + Send + Sync + 'static,
    {
        let context = ExecutionContext::active().ok_or(Error::NoContextForProvider)?;
        self.set_state_provider_for(context, provider);
        Ok(())
    }

    /// Register the initial-state provider for a specific context.
    pub fn set_state_provider_for<F>(&self, context: ContextId, provider: F)
    where
        F: Fn() -> Map<String, Value> + Send + Sync + 'static,
    {
        self.entry(context).provider = Some(Arc::new(provider));
    }

    fn entry(&self, context: ContextId) -> RefMut<'_, ContextId, ContextEntry> {
        self.contexts.entry(context).or_insert_with(|| {
            tracing::debug!(context = %context, "context created");
            ContextEntry::default()
        })
    }

    /// Hydrated state for one store. A missing or `null` entry means "not
    /// hydrated", so the definition's factory is used instead.
    fn initial_state(&self, context: ContextId, store_id: &str) -> Option<Value> {
        let provider = self.contexts.get(&context)?.provider.clone()?;
        provider().remove(store_id).filter(|state| !state.is_null())
    }

    /// Resolve the instance of `definition` for a context.
    ///
    /// With `explicit` set, that context is activated first. Otherwise the
    /// thread's active context is used, and its absence is an error rather
    /// than a silent fallback to some shared context.
    pub fn resolve(&self, definition: &Arc<StoreDefinition>, explicit: Option<ContextId>) -> Result<Store> {
        if let Some(context) = explicit {
            ExecutionContext::set_active(context);
        }
        let context = ExecutionContext::active().ok_or_else(|| Error::NoActiveContext {
            store_id: definition.id().to_string(),
        })?;

        if let Some(store) = self.get(context, definition.id()) {
            return Ok(store);
        }

        let hydrated = self.initial_state(context, definition.id());
        let observer = self.observer.read().clone();
        let built = Store::build(Arc::clone(definition), context, hydrated, observer.clone());

        let (store, created) = {
            let mut entry = self.entry(context);
            let resolved = match entry.stores.entry(definition.id().to_string()) {
                // Another caller won the race while we were building.
                Entry::Occupied(existing) => (existing.get().clone(), false),
                Entry::Vacant(slot) => (slot.insert(built).clone(), true),
            };
            resolved
        };

        if created {
            tracing::debug!(store = store.id(), context = %context, "store registered");
            if let Some(observer) = observer {
                notify_observer(store.id(), || observer.store_installed(&store));
            }
        }
        Ok(store)
    }

    /// The instance registered under `store_id` in `context`, if any.
    pub fn get(&self, context: ContextId, store_id: &str) -> Option<Store> {
        self.contexts.get(&context)?.stores.get(store_id).cloned()
    }

    /// Ids of the stores resolved so far in `context`, in creation order.
    pub fn store_ids(&self, context: ContextId) -> Vec<String> {
        self.contexts
            .get(&context)
            .map(|entry| entry.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current state of every store in `context`, keyed by store id.
    ///
    /// Useful for error reports and for serializing state to hydrate a
    /// client with.
    pub fn root_state(&self, context: ContextId) -> Map<String, Value> {
        self.stores_of(context)
            .into_iter()
            .map(|store| (store.id().to_string(), store.with_state(Value::clone)))
            .collect()
    }

    /// Replace the state of each store in `context` named in `root`.
    ///
    /// Replacement is silent, like [`Store::set_state`]. Ids without a
    /// store are skipped. Returns how many stores were replaced.
    pub fn travel_to_state(&self, context: ContextId, root: &Map<String, Value>) -> usize {
        let mut replaced = 0;
        for store in self.stores_of(context) {
            if let Some(state) = root.get(store.id()) {
                store.set_state(state.clone());
                replaced += 1;
            }
        }
        replaced
    }

    /// Forget a context and every store in it.
    ///
    /// Returns how many stores were dropped.
    pub fn dispose_context(&self, context: ContextId) -> usize {
        let dropped = self
            .contexts
            .remove(&context)
            .map(|(_, entry)| entry.stores.len())
            .unwrap_or(0);
        tracing::debug!(context = %context, stores = dropped, "context disposed");
        dropped
    }

    /// Contexts that currently hold stores or a state provider.
    pub fn contexts(&self) -> Vec<ContextId> {
        self.contexts.iter().map(|entry| *entry.key()).collect()
    }

    fn stores_of(&self, context: ContextId) -> Vec<Store> {
        self.contexts
            .get(&context)
            .map(|entry| entry.stores.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("contexts", &self.contexts.len())
            .field("observer", &self.observer.read().is_some())
            .finish()
    }
}
