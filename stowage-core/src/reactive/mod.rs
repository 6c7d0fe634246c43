//! Reactive Primitives
//!
//! This module implements the reactive cell capability stores are built on:
//! signals, memos, and effects.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal
//! registers that context as a dependent. When the signal's value changes,
//! all dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when it is next read. Store
//! getters are memos.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs synchronously whenever
//! its dependencies change. Each store's state watcher is an effect.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a source is read, we check if there is an active
//! tracking context and, if so, register the dependency.

mod signal;
mod context;
mod subscriber;
mod memo;
mod effect;
mod runtime;

pub use signal::Signal;
pub use context::ReactiveContext;
pub use subscriber::SubscriberId;
pub use memo::{Memo, MemoState};
pub use effect::Effect;
pub use runtime::{Runtime, Reactive, ReactiveHandle};
