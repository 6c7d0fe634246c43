//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a signal it read changes, the memo is marked "dirty". When a memo
//!    it read is invalidated, it is marked "maybe dirty".
//!
//! 4. On next access a dirty memo recomputes. A maybe-dirty memo first
//!    refreshes the upstream memos; it recomputes only if one of them
//!    produced a new value, otherwise it is marked clean.
//!
//! # Why This Matters
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay dirty (no wasted work)
//!
//! # Thread Safety
//!
//! Memos are thread-safe. The computation runs with no lock held, so it may
//! read other memos and signals freely.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::context::ReactiveContext;
use super::runtime::{next_source_id, Observed, Reactive, ReactiveHandle, Runtime};
use super::subscriber::SubscriberId;

/// Dirty state for a memo or effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

struct MemoInner<T> {
    source_id: u64,
    subscriber_id: SubscriberId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: Mutex<MemoState>,
    /// Bumped every time a recompute produces a different value.
    version: AtomicU64,
    observed: Mutex<Observed>,
    recompute_count: AtomicU64,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn current(&self) -> T {
        let state = *self.state.lock();

        match state {
            MemoState::Clean => match self.value.read().clone() {
                Some(value) => value,
                None => self.recompute(),
            },
            MemoState::MaybeDirty => {
                let observed = self.observed.lock().clone();
                if observed.changed() {
                    self.recompute()
                } else {
                    *self.state.lock() = MemoState::Clean;
                    match self.value.read().clone() {
                        Some(value) => value,
                        None => self.recompute(),
                    }
                }
            }
            MemoState::Dirty => self.recompute(),
        }
    }

    fn recompute(&self) -> T {
        Runtime::clear_dependencies(self.subscriber_id);

        let (new_value, dependencies) = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            let value = (self.compute)();
            (value, ReactiveContext::get_dependencies())
        };

        *self.observed.lock() = Observed::capture(&dependencies);
        self.recompute_count.fetch_add(1, Ordering::Relaxed);

        let changed = {
            let mut cached = self.value.write();
            let changed = cached.as_ref() != Some(&new_value);
            *cached = Some(new_value.clone());
            changed
        };

        if changed {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        *self.state.lock() = MemoState::Clean;

        new_value
    }

    fn invalidate(&self, next: MemoState) {
        let was_clean = {
            let mut state = self.state.lock();
            let was_clean = *state == MemoState::Clean;
            if next == MemoState::Dirty || was_clean {
                *state = next;
            }
            was_clean
        };

        if was_clean {
            Runtime::notify_derived_change(self.source_id);
        }
    }
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) {
        self.invalidate(MemoState::Dirty);
    }

    fn mark_maybe_dirty(&self) {
        self.invalidate(MemoState::MaybeDirty);
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }

    fn source_id(&self) -> Option<u64> {
        Some(self.source_id)
    }

    fn refresh(&self) -> Option<u64> {
        self.current();
        self.version()
    }

    fn version(&self) -> Option<u64> {
        Some(self.version.load(Ordering::Acquire))
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound is needed to detect when the computed value actually
/// changed (a memo may return the same value even if inputs changed), which
/// keeps downstream memos from recomputing needlessly.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
    _handle: Arc<ReactiveHandle>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            source_id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: Mutex::new(MemoState::Dirty),
            version: AtomicU64::new(0),
            observed: Mutex::new(Observed::default()),
            recompute_count: AtomicU64::new(0),
        });
        let handle = Runtime::register(inner.clone());

        Self {
            inner,
            _handle: Arc::new(handle),
        }
    }

    /// Get the memo's source ID.
    pub fn id(&self) -> u64 {
        self.inner.source_id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        if let Some(current_subscriber) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(self.inner.source_id);
            Runtime::add_dependency(self.inner.source_id, current_subscriber);
        }

        self.inner.current()
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        self.inner.mark_dirty();
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.lock()
    }

    /// How many times the computation has run.
    pub fn recompute_count(&self) -> u64 {
        self.inner.recompute_count.load(Ordering::Relaxed)
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        Runtime::dependent_count(self.inner.source_id)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _handle: Arc::clone(&self._handle),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.source_id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
