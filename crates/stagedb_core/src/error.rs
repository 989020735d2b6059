//! Error types for StageDB core.

use stagedb_store::{ObjectId, StoreError};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in StageDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A call broke the threading or ownership rules.
    ///
    /// These signal programmer error and are raised at the offending call,
    /// never deferred to save time.
    #[error("precondition violated: {0}")]
    Precondition(#[from] Violation),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A transaction queue could not be started.
    #[error("failed to start transaction queue: {0}")]
    Spawn(#[source] io::Error),

    /// An asynchronous transaction body panicked.
    #[error("transaction panicked: {message}")]
    TransactionPanicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl CoreError {
    /// Returns `true` for precondition violations.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Returns the violation, if this is one.
    #[must_use]
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Precondition(v) => Some(v),
            _ => None,
        }
    }

    /// Creates a transaction panicked error from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::TransactionPanicked { message }
    }
}

/// The precondition a call violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// A write context was attached to the main thread.
    #[error("{operation}: the main thread cannot own a write context")]
    IllegalThread {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The operation is forbidden on the main thread.
    #[error("{operation}: not allowed on the main thread")]
    MainThread {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The operation is only allowed on the main thread.
    #[error("{operation}: only allowed on the main thread")]
    NotMainThread {
        /// The rejected operation.
        operation: &'static str,
    },

    /// No transaction is running on the calling thread.
    #[error("{operation}: not inside a transaction")]
    NotInTransaction {
        /// The rejected operation.
        operation: &'static str,
    },

    /// No context is bound to the calling thread.
    #[error("{operation}: no context attached to the calling thread")]
    NoContext {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The stack was initialized twice.
    #[error("stack already initialized")]
    AlreadyInitialized,

    /// The stack was used before initialization.
    #[error("stack not initialized")]
    NotInitialized,

    /// A transient object was used where a persisted one is required.
    #[error("{operation}: object is transient")]
    TransientObject {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The object has no owning context.
    #[error("{operation}: object has no context")]
    Unowned {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The object belongs to a different context than the caller's.
    #[error("{operation}: object belongs to a different context")]
    CrossContext {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The source context has unsaved changes.
    #[error("use_in_current_context: source context has unsaved changes, commit first")]
    UnsavedChanges,

    /// An object of the read context was mutated outside a merge.
    #[error("object {id} belongs to the read context and is read-only")]
    ReadOnlyObject {
        /// The object.
        id: ObjectId,
    },

    /// A deleted object was mutated.
    #[error("object {id} has been deleted")]
    DeletedObject {
        /// The object.
        id: ObjectId,
    },

    /// The attribute is not declared by the entity.
    #[error("entity {entity} has no attribute {attribute}")]
    UnknownAttribute {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// Only write contexts can be attached to a thread.
    #[error("only write contexts can be attached to a thread")]
    NotAWriteContext,
}
