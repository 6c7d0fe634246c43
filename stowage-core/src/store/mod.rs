//! Stores
//!
//! A store is a named unit of observable state with derived values
//! (getters) and mutating procedures (actions).
//!
//! - `patch`: the deep patch merger
//! - `notifier`: mutation events and the ordered subscriber list
//! - `getters`: memoized derived values
//! - `store`: the store instance itself
//! - `definition`: static store configuration and the `UseStore` accessor

mod patch;
mod notifier;
mod getters;
mod store;
mod definition;

pub use patch::{deep_merge, is_plain_record, kind_of};
pub use notifier::{MutationCallback, MutationEvent, MutationKind, Notifier, Subscription};
pub use getters::{GetterFn, Getters};
pub use store::{Store, WeakStore};
pub use definition::{define_store, ActionFn, StateFactory, StoreDefinition, StoreDefinitionBuilder, UseStore};
