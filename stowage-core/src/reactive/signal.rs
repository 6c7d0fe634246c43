//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: the "reactive cell" a
//! store keeps its state in. It holds a value and tells the runtime which
//! computations read it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a dependent.
//!
//! 2. When a signal's value changes, the runtime invalidates dependent
//!    memos and runs dependent effects synchronously.
//!
//! # Thread Safety
//!
//! The value is protected by a `parking_lot::RwLock`. The lock is never held
//! while caller-supplied closures run, so a closure may read the signal
//! again without deadlocking.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime::{next_source_id, Runtime};

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use stowage_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Source identifier for dependency tracking.
    id: u64,

    /// The current value.
    value: Arc<RwLock<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_source_id(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn track(&self) {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.id);
            Runtime::add_dependency(self.id, subscriber_id);
        }
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        self.track();
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// `f` runs under the read lock and must not write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.value.read())
    }

    /// Set a new value and notify dependents.
    ///
    /// Dependents are notified even when the new value equals the old one:
    /// assignment always counts as a change.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        Runtime::notify_signal_change(self.id);
    }

    /// Edit the value in place, notifying dependents only if it changed.
    ///
    /// The comparison is deep (`PartialEq`), so an edit anywhere inside a
    /// nested structure counts. Returns whether the value changed.
    pub fn modify<F>(&self, f: F) -> bool
    where
        T: PartialEq,
        F: FnOnce(&mut T),
    {
        let mut next = self.get_untracked();
        f(&mut next);

        let changed = {
            let mut guard = self.value.write();
            if *guard != next {
                *guard = next;
                true
            } else {
                false
            }
        };

        if changed {
            Runtime::notify_signal_change(self.id);
        }
        changed
    }

    /// Get the number of computations depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        Runtime::dependent_count(self.id)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
