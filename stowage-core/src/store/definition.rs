//! Store configuration and the store factory.
//!
//! A [`StoreDefinition`] is the static description of a store: its id, how
//! to build its initial state, its getters, and its actions. It is immutable
//! once built. [`UseStore`] is the accessor returned for a definition; each
//! call resolves (or lazily creates) the instance for the current execution
//! context.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::getters::{GetterFn, Getters};
use super::store::Store;
use crate::context::{ContextId, Registry};
use crate::error::{Error, Result};

/// Builds a store's default state.
pub type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// An action body. Receives the store and the call arguments unchanged.
pub type ActionFn = Arc<dyn Fn(&Store, &[Value]) -> Result<Value> + Send + Sync>;

/// Static configuration of one store.
pub struct StoreDefinition {
    id: String,
    state: StateFactory,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionFn>,
}

impl StoreDefinition {
    pub fn builder(id: impl Into<String>) -> StoreDefinitionBuilder {
        StoreDefinitionBuilder {
            id: id.into(),
            state: None,
            getters: IndexMap::new(),
            actions: IndexMap::new(),
            duplicate: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A fresh default state.
    pub fn initial_state(&self) -> Value {
        (self.state)()
    }

    pub fn getters(&self) -> &IndexMap<String, GetterFn> {
        &self.getters
    }

    pub fn action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Turn the definition into an accessor bound to the global registry.
    pub fn into_factory(self) -> UseStore {
        UseStore::new(Arc::new(self), Registry::global().clone())
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("id", &self.id)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`StoreDefinition`].
pub struct StoreDefinitionBuilder {
    id: String,
    state: Option<StateFactory>,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionFn>,
    duplicate: Option<String>,
}

impl StoreDefinitionBuilder {
    /// Initial-state factory. Defaults to an empty object.
    pub fn state<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.state = Some(Arc::new(factory));
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Value, &Getters) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        if self.is_taken(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.getters.insert(name, Arc::new(getter));
        }
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.is_taken(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.actions.insert(name, Arc::new(action));
        }
        self
    }

    fn is_taken(&self, name: &str) -> bool {
        self.getters.contains_key(name) || self.actions.contains_key(name)
    }

    /// Finish the definition.
    ///
    /// Fails if a getter or action name was declared twice, since both
    /// share one namespace on the store.
    pub fn build(self) -> Result<StoreDefinition> {
        if let Some(name) = self.duplicate {
            return Err(Error::DuplicateName { store_id: self.id, name });
        }

        let state: StateFactory = match self.state {
            Some(factory) => factory,
            None => Arc::new(|| Value::Object(Map::new())),
        };

        Ok(StoreDefinition {
            id: self.id,
            state,
            getters: self.getters,
            actions: self.actions,
        })
    }
}

/// Accessor resolving a definition's instance for the current context.
#[derive(Clone)]
pub struct UseStore {
    definition: Arc<StoreDefinition>,
    registry: Arc<Registry>,
}

impl UseStore {
    pub fn new(definition: Arc<StoreDefinition>, registry: Arc<Registry>) -> Self {
        Self { definition, registry }
    }

    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &Arc<StoreDefinition> {
        &self.definition
    }

    /// The instance for the active execution context.
    pub fn get(&self) -> Result<Store> {
        self.registry.resolve(&self.definition, None)
    }

    /// Activate `context`, then resolve the instance for it.
    pub fn get_in(&self, context: ContextId) -> Result<Store> {
        self.registry.resolve(&self.definition, Some(context))
    }
}

impl fmt::Debug for UseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseStore").field("id", &self.id()).finish()
    }
}

/// Define a store against the global registry.
pub fn define_store(definition: StoreDefinition) -> UseStore {
    definition.into_factory()
}
