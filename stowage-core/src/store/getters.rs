//! Derived-Value Memoizer
//!
//! Every getter declared on a store becomes a [`Memo`] over the store's state
//! cell. A getter is computed on first read, cached, marked dirty when the
//! state (or a sibling getter it read) changes, and recomputed lazily on the
//! next read.
//!
//! Before a getter runs, the store's own execution context is made active,
//! so a getter can resolve other stores of the same context.

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::{ContextId, ExecutionContext};
use crate::reactive::{Memo, Signal};

/// A getter definition: derives a value from the state and sibling getters.
pub type GetterFn = Arc<dyn Fn(&Value, &Getters) -> Value + Send + Sync>;

type GetterTable = OnceLock<IndexMap<String, Memo<Value>>>;

/// The memoized getters of one store instance.
///
/// Cloning is cheap and shares the caches.
#[derive(Clone)]
pub struct Getters {
    table: Arc<GetterTable>,
}

impl Getters {
    pub(crate) fn install(state: &Signal<Value>, definitions: &IndexMap<String, GetterFn>, context: ContextId) -> Self {
        let table: Arc<GetterTable> = Arc::new(OnceLock::new());

        let memos = definitions
            .iter()
            .map(|(name, getter)| {
                let state = state.clone();
                let getter = Arc::clone(getter);
                // Weak, so the memos do not keep their own table alive.
                let siblings = Arc::downgrade(&table);

                let memo = Memo::new(move || {
                    ExecutionContext::set_active(context);
                    let current = state.get();
                    match siblings.upgrade() {
                        Some(table) => getter(&current, &Getters { table }),
                        None => Value::Null,
                    }
                });
                (name.clone(), memo)
            })
            .collect();

        // Freshly created, so the cell is still empty.
        let _ = table.set(memos);
        Self { table }
    }

    fn memos(&self) -> Option<&IndexMap<String, Memo<Value>>> {
        self.table.get()
    }

    /// Read a getter, recomputing it only if a dependency changed.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.memos()?.get(name).map(Memo::get)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.memos().is_some_and(|memos| memos.contains_key(name))
    }

    /// Getter names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.memos()
            .map(|memos| memos.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.memos().map(IndexMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a getter's computation has run.
    pub fn recompute_count(&self, name: &str) -> Option<u64> {
        self.memos()?.get(name).map(Memo::recompute_count)
    }
}

impl fmt::Debug for Getters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
