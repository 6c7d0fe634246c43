//! Stowage Core
//!
//! Request-scoped reactive state stores. A store is defined once (id,
//! initial-state factory, getters, actions) and resolved per execution
//! context, so concurrent requests never share state.
//!
//! It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Deep patching of partial state, coalesced into one notification
//! - Ordered mutation subscriptions
//! - Memoized getters
//! - A registry keyed by execution context, with hydration support
//!
//! # Architecture
//!
//! - `reactive`: signals, memos, effects and dependency tracking
//! - `store`: store definitions, instances, patching and notification
//! - `context`: execution-context handles and the per-context registry
//! - `devtools`: optional observer for external state inspectors
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use stowage_core::{define_store, ContextId, StoreDefinition};
//!
//! let use_counter = define_store(
//!     StoreDefinition::builder("counter")
//!         .state(|| json!({ "n": 0 }))
//!         .getter("double", |state, _| json!(state["n"].as_i64().unwrap_or(0) * 2))
//!         .action("increment", |store, _| {
//!             let n = store.state()["n"].as_i64().unwrap_or(0) + 1;
//!             store.patch(json!({ "n": n }))?;
//!             Ok(json!(n))
//!         })
//!         .build()
//!         .unwrap(),
//! );
//!
//! let request = ContextId::new();
//! let counter = use_counter.get_in(request).unwrap();
//! counter.dispatch("increment", &[]).unwrap();
//! assert_eq!(counter.getter("double").unwrap(), json!(2));
//! ```

pub mod reactive;
pub mod store;
pub mod context;
pub mod devtools;
pub mod error;

pub use context::{ContextGuard, ContextId, ExecutionContext, Registry, StateProvider};
pub use devtools::{Inspector, StoreObserver};
pub use error::{Error, Result};
pub use store::{
    define_store, MutationEvent, MutationKind, Store, StoreDefinition, Subscription, UseStore, WeakStore,
};
