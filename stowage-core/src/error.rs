//! Error types for stowage-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A store was resolved while no execution context was active.
    #[error("no active execution context while resolving store `{store_id}`")]
    NoActiveContext { store_id: String },

    #[error("no active execution context to register a state provider for")]
    NoContextForProvider,

    #[error("cannot patch store `{store_id}`: expected an object, found {found}")]
    InvalidPatch { store_id: String, found: &'static str },

    #[error("store `{store_id}` has no getter named `{name}`")]
    UnknownGetter { store_id: String, name: String },

    #[error("store `{store_id}` has no action named `{name}`")]
    UnknownAction { store_id: String, name: String },

    #[error("store `{store_id}` declares `{name}` more than once")]
    DuplicateName { store_id: String, name: String },

    /// Raised by action bodies.
    #[error("action `{action}` failed: {reason}")]
    Action { action: String, reason: String },
}

impl Error {
    /// Build the error an action body returns for a domain failure.
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
