//! Mutation Notifier
//!
//! An ordered list of callbacks run after every state mutation of a store.
//! Each callback gets the same [`MutationEvent`] and the post-mutation
//! snapshot, synchronously and in registration order.
//!
//! A callback that panics is isolated: the panic is caught and logged, and
//! the remaining callbacks still run.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reactive::{ReactiveContext, SubscriberId};

/// How a mutation reached the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// The live state was edited or replaced without going through `patch`.
    DirectAssignment,
    /// A partial state was merged with `patch`.
    Patch,
}

impl MutationKind {
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::DirectAssignment => "in place",
            MutationKind::Patch => "patch",
        }
    }
}

/// Describes one state-changing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Id of the store that changed.
    pub store_id: String,
    pub kind: MutationKind,
    /// The partial object for a patch; an empty object otherwise.
    pub payload: Value,
}

impl MutationEvent {
    pub fn direct(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            kind: MutationKind::DirectAssignment,
            payload: Value::Object(Map::new()),
        }
    }

    pub fn patch(store_id: impl Into<String>, payload: Value) -> Self {
        Self {
            store_id: store_id.into(),
            kind: MutationKind::Patch,
            payload,
        }
    }

    /// Inspector label, e.g. `[cart] patch`.
    pub fn label(&self) -> String {
        format!("[{}] {}", self.store_id, self.kind.label())
    }
}

/// Callback invoked with a mutation and the state after it.
pub type MutationCallback = Arc<dyn Fn(&MutationEvent, &Value) + Send + Sync>;

type CallbackList = Mutex<Vec<(SubscriberId, MutationCallback)>>;

/// Ordered subscriber list for one store.
#[derive(Clone, Default)]
pub struct Notifier {
    callbacks: Arc<CallbackList>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback. The returned [`Subscription`] removes exactly it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MutationEvent, &Value) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.callbacks.lock().push((id, Arc::new(callback)));

        Subscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    /// Run every registered callback, in order. Returns how many ran
    /// without panicking.
    ///
    /// The list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe while being notified; such changes apply to the next
    /// mutation.
    pub fn notify(&self, event: &MutationEvent, state: &Value) -> usize {
        let callbacks: Vec<(SubscriberId, MutationCallback)> = self.callbacks.lock().clone();
        tracing::trace!(store = %event.store_id, kind = event.kind.label(), subscribers = callbacks.len(), "notifying");

        ReactiveContext::untracked(|| {
            let mut delivered = 0;
            for (id, callback) in &callbacks {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(event, state))) {
                    Ok(()) => delivered += 1,
                    Err(_) => {
                        tracing::warn!(store = %event.store_id, subscriber = %id, "subscriber panicked, continuing with the rest");
                    }
                }
            }
            delivered
        })
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").field("subscribers", &self.len()).finish()
    }
}

/// Capability that removes one subscription.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriberId,
    callbacks: Weak<CallbackList>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback. Returns `false` if it was already gone
    /// (unsubscribed before, cleared by a reset, or the store was dropped).
    pub fn unsubscribe(&self) -> bool {
        let Some(callbacks) = self.callbacks.upgrade() else {
            return false;
        };
        let mut callbacks = callbacks.lock();

        match callbacks.iter().position(|(id, _)| *id == self.id) {
            Some(index) => {
                callbacks.remove(index);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
