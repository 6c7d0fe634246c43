//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Stores use one effect per instance as the state
//! watcher that reports in-place edits to subscribers.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the runtime schedules the effect and it
//!    re-runs synchronously (there is no deferred flush).
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::memo::MemoState;
use super::runtime::{Observed, Reactive, ReactiveHandle, Runtime};
use super::subscriber::SubscriberId;

struct EffectInner {
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    state: Mutex<MemoState>,
    observed: Mutex<Observed>,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        Runtime::clear_dependencies(self.subscriber_id);
        *self.state.lock() = MemoState::Clean;

        let dependencies = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            ReactiveContext::get_dependencies()
        };

        *self.observed.lock() = Observed::capture(&dependencies);
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) {
        *self.state.lock() = MemoState::Dirty;
    }

    fn mark_maybe_dirty(&self) {
        let mut state = self.state.lock();
        if *state == MemoState::Clean {
            *state = MemoState::MaybeDirty;
        }
    }

    fn schedule(&self) {
        let state = *self.state.lock();
        match state {
            MemoState::Clean => {}
            MemoState::MaybeDirty => {
                let observed = self.observed.lock().clone();
                if observed.changed() {
                    self.execute();
                } else {
                    *self.state.lock() = MemoState::Clean;
                }
            }
            MemoState::Dirty => self.execute(),
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use stowage_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let source = count.clone();
/// let effect = Effect::new(move || {
///     let _ = source.get();
/// });
///
/// count.set(5);
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
    _handle: Arc<ReactiveHandle>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            subscriber_id: SubscriberId::new(),
            run: Box::new(run),
            state: Mutex::new(MemoState::Dirty),
            observed: Mutex::new(Observed::default()),
            run_count: AtomicUsize::new(0),
        });
        let handle = Runtime::register(inner.clone());
        inner.execute();

        Self {
            inner,
            _handle: Arc::new(handle),
        }
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Execute the effect function, re-tracking its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _handle: Arc::clone(&self._handle),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("run_count", &self.run_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
