//! Execution-context handles and the active context.
//!
//! An execution context is one logical unit of work, such as a single
//! inbound request. Stores are isolated per context.
//!
//! The active context is thread-local: each thread has its own "which
//! request am I serving" slot, so concurrent requests on different threads
//! never see each other's handle. Hosts activate a context around each unit
//! of work with [`ExecutionContext::enter`] or [`ExecutionContext::scope`].

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

thread_local! {
    static ACTIVE: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Opaque key identifying one execution context.
///
/// [`ContextId::new`] hands out process-unique ids. Hosts that already own a
/// request key can wrap it with [`ContextId::from_raw`]; they should then not
/// mix raw keys with generated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh context id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a host-provided key.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Access to the current thread's active execution context.
pub struct ExecutionContext;

impl ExecutionContext {
    /// The context currently active on this thread, if any.
    pub fn active() -> Option<ContextId> {
        ACTIVE.with(Cell::get)
    }

    /// Make `context` the active one and return the previous value.
    ///
    /// The change persists until the next `set_active`/`clear`. Prefer
    /// [`ExecutionContext::enter`] when the previous context must come back.
    pub fn set_active(context: ContextId) -> Option<ContextId> {
        ACTIVE.with(|active| active.replace(Some(context)))
    }

    /// Deactivate any context on this thread.
    pub fn clear() -> Option<ContextId> {
        ACTIVE.with(|active| active.replace(None))
    }

    /// Activate `context` until the returned guard is dropped.
    pub fn enter(context: ContextId) -> ContextGuard {
        ContextGuard {
            previous: Self::set_active(context),
        }
    }

    /// Run `f` with `context` active, restoring the previous context after.
    ///
    /// This is the hook a host wraps around request handling, component
    /// setup, or server-side prefetch so nested calls inherit the handle.
    pub fn scope<R>(context: ContextId, f: impl FnOnce() -> R) -> R {
        let _guard = Self::enter(context);
        f()
    }
}

/// Restores the previously active context when dropped.
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ContextId>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(self.previous));
    }
}
