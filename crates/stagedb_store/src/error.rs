//! Error types for object store operations.

use crate::id::ObjectId;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The entity is not part of the store's model.
    #[error("unknown entity: {name}")]
    UnknownEntity {
        /// Name of the entity.
        name: String,
    },

    /// An insert targeted an identity that already exists.
    #[error("object already exists: {id}")]
    DuplicateObject {
        /// The conflicting identity.
        id: ObjectId,
    },

    /// An update targeted an identity with no backing record.
    #[error("object not found: {id}")]
    ObjectNotFound {
        /// The missing identity.
        id: ObjectId,
    },

    /// The store refused the save.
    #[error("save rejected: {reason}")]
    SaveRejected {
        /// Why the save was refused.
        reason: String,
    },
}

impl StoreError {
    /// Creates an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates a save rejected error.
    pub fn save_rejected(reason: impl Into<String>) -> Self {
        Self::SaveRejected {
            reason: reason.into(),
        }
    }
}
