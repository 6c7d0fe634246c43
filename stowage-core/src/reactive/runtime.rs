//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency table and propagates invalidation when a
//! source changes.
//!
//! # How It Works
//!
//! 1. Memos and effects register with the runtime when created.
//!
//! 2. When a memo or effect reads a source (signal or memo), the runtime
//!    records the edge `source -> subscriber`.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks its direct dependents dirty
//!    b. Dirty memos mark their own dependents "maybe dirty"
//!    c. Queues effects and runs them once the whole propagation settles
//!    d. Memos are lazy - they recompute on next access
//!
//! # Thread Safety
//!
//! The dependency table is global and guarded by `parking_lot` locks. The
//! tracking stack and the effect batch are thread-local. No table lock is
//! held while a memo, effect, or other user computation runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use smallvec::SmallVec;

use super::subscriber::SubscriberId;

/// A trait for types that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// A direct dependency changed: the value must be recomputed.
    fn mark_dirty(&self);

    /// An upstream derived value was invalidated: it may have changed.
    fn mark_maybe_dirty(&self);

    /// Schedule this reactive value for execution (effects only).
    fn schedule(&self);

    /// Check if this reactive value is an effect (eager) or memo (lazy).
    fn is_eager(&self) -> bool;

    /// The source ID under which other computations depend on this value.
    ///
    /// Only derived values (memos) are sources.
    fn source_id(&self) -> Option<u64> {
        None
    }

    /// Bring the value up to date and return its version.
    fn refresh(&self) -> Option<u64> {
        None
    }

    /// The current version, without refreshing.
    fn version(&self) -> Option<u64> {
        None
    }
}

/// Handle to a registered reactive value.
///
/// Dropping this handle unregisters the reactive value from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
    source_id: Option<u64>,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id, self.source_id);
    }
}

/// The global reactive runtime.
pub struct Runtime;

#[derive(Clone, Copy)]
enum Change {
    Direct,
    Upstream,
}

/// Effects queued during one propagation pass.
#[derive(Default)]
struct Batch {
    depth: usize,
    queued: IndexMap<SubscriberId, Arc<dyn Reactive>>,
}

thread_local! {
    static BATCH: RefCell<Batch> = RefCell::new(Batch::default());
}

type ReactiveTable = RwLock<HashMap<SubscriberId, Weak<dyn Reactive>>>;

// Weak references so the runtime never keeps a computation alive.
static REGISTRY: OnceLock<ReactiveTable> = OnceLock::new();
static SOURCE_SUBSCRIBERS: OnceLock<RwLock<HashMap<u64, IndexSet<SubscriberId>>>> = OnceLock::new();
static DERIVED_SOURCES: OnceLock<RwLock<HashMap<u64, Weak<dyn Reactive>>>> = OnceLock::new();
// Reverse of SOURCE_SUBSCRIBERS, so clearing touches only a subscriber's own sources.
static SUBSCRIBER_SOURCES: OnceLock<RwLock<HashMap<SubscriberId, IndexSet<u64>>>> = OnceLock::new();

fn get_registry() -> &'static ReactiveTable {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_source_subscribers() -> &'static RwLock<HashMap<u64, IndexSet<SubscriberId>>> {
    SOURCE_SUBSCRIBERS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_derived_sources() -> &'static RwLock<HashMap<u64, Weak<dyn Reactive>>> {
    DERIVED_SOURCES.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_subscriber_sources() -> &'static RwLock<HashMap<SubscriberId, IndexSet<u64>>> {
    SUBSCRIBER_SOURCES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Generate a new source ID. Signals and memos share one counter.
pub(crate) fn next_source_id() -> u64 {
    static SOURCE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
    SOURCE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl Runtime {
    /// Register a reactive value with the runtime.
    ///
    /// Returns a handle that unregisters the value when dropped.
    pub fn register(reactive: Arc<dyn Reactive>) -> ReactiveHandle {
        let id = reactive.subscriber_id();
        let source_id = reactive.source_id();

        get_registry().write().insert(id, Arc::downgrade(&reactive));

        if let Some(source_id) = source_id {
            get_derived_sources()
                .write()
                .insert(source_id, Arc::downgrade(&reactive));
        }

        ReactiveHandle {
            subscriber_id: id,
            source_id,
        }
    }

    fn unregister(id: SubscriberId, source_id: Option<u64>) {
        get_registry().write().remove(&id);
        Self::clear_dependencies(id);

        if let Some(source_id) = source_id {
            get_derived_sources().write().remove(&source_id);
            get_source_subscribers().write().remove(&source_id);
        }
    }

    /// Record that a subscriber depends on a source.
    ///
    /// Called automatically when a source is read within a reactive context.
    pub fn add_dependency(source_id: u64, subscriber_id: SubscriberId) {
        get_source_subscribers()
            .write()
            .entry(source_id)
            .or_default()
            .insert(subscriber_id);
        get_subscriber_sources()
            .write()
            .entry(subscriber_id)
            .or_default()
            .insert(source_id);
    }

    /// Remove all dependencies for a subscriber.
    ///
    /// Called before re-running a computation to clear stale dependencies.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        let Some(sources) = get_subscriber_sources().write().remove(&subscriber_id) else {
            return;
        };

        let mut subscribers = get_source_subscribers().write();
        for source_id in sources {
            if let Some(subs) = subscribers.get_mut(&source_id) {
                subs.shift_remove(&subscriber_id);
                if subs.is_empty() {
                    subscribers.remove(&source_id);
                }
            }
        }
    }

    /// Number of computations currently depending on a source.
    pub fn dependent_count(source_id: u64) -> usize {
        get_source_subscribers()
            .read()
            .get(&source_id)
            .map(IndexSet::len)
            .unwrap_or(0)
    }

    /// Notify all dependents that a signal changed.
    ///
    /// Direct dependents become dirty. Effects run synchronously once the
    /// outermost propagation pass has finished marking.
    pub fn notify_signal_change(source_id: u64) {
        Self::propagate(source_id, Change::Direct);
    }

    /// Notify all dependents that a derived value may have changed.
    pub fn notify_derived_change(source_id: u64) {
        Self::propagate(source_id, Change::Upstream);
    }

    fn propagate(source_id: u64, change: Change) {
        let subscriber_ids: SmallVec<[SubscriberId; 8]> = match get_source_subscribers().read().get(&source_id) {
            Some(subs) => subs.iter().copied().collect(),
            None => return,
        };

        let reactives: Vec<Arc<dyn Reactive>> = {
            let registry = get_registry().read();
            subscriber_ids
                .iter()
                .filter_map(|id| registry.get(id).and_then(Weak::upgrade))
                .collect()
        };

        BATCH.with(|batch| batch.borrow_mut().depth += 1);

        for reactive in reactives {
            match change {
                Change::Direct => reactive.mark_dirty(),
                Change::Upstream => reactive.mark_maybe_dirty(),
            }

            if reactive.is_eager() {
                BATCH.with(|batch| {
                    batch
                        .borrow_mut()
                        .queued
                        .entry(reactive.subscriber_id())
                        .or_insert(reactive);
                });
            }
        }

        let ready = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            if batch.depth == 0 {
                std::mem::take(&mut batch.queued)
            } else {
                IndexMap::new()
            }
        });

        for (_, effect) in ready {
            effect.schedule();
        }
    }

    /// Bring a derived source up to date and return its version.
    ///
    /// Returns `None` if the source is not a live derived value.
    pub fn refresh_source(source_id: u64) -> Option<u64> {
        let source = get_derived_sources().read().get(&source_id).and_then(Weak::upgrade);
        source.and_then(|source| source.refresh())
    }

    /// Current version of a derived source, without refreshing it.
    pub fn source_version(source_id: u64) -> Option<u64> {
        let source = get_derived_sources().read().get(&source_id).and_then(Weak::upgrade);
        source.and_then(|source| source.version())
    }
}

/// Versions of the derived sources a computation read on its last run.
///
/// A "maybe dirty" computation compares these against the refreshed
/// versions to decide whether it really has to run again.
#[derive(Debug, Default, Clone)]
pub(crate) struct Observed {
    derived: SmallVec<[(u64, u64); 4]>,
}

impl Observed {
    pub(crate) fn capture(dependencies: &[u64]) -> Self {
        Self {
            derived: dependencies
                .iter()
                .filter_map(|id| Runtime::source_version(*id).map(|version| (*id, version)))
                .collect(),
        }
    }

    pub(crate) fn changed(&self) -> bool {
        self.derived
            .iter()
            .any(|(id, seen)| Runtime::refresh_source(*id) != Some(*seen))
    }
}
