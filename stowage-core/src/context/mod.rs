//! Execution contexts
//!
//! Stores are isolated per execution context: one inbound request, one
//! session, one test. This module holds the context handle, the per-thread
//! active context, and the registry of store instances per context.

mod handle;
mod registry;

pub use handle::{ContextGuard, ContextId, ExecutionContext};
pub use registry::{Registry, StateProvider};
