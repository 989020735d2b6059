//! Object store trait definition.

use crate::error::StoreResult;
use crate::id::ObjectId;
use crate::model::EntityDescription;
use crate::record::{ChangeSet, Record, SaveReceipt};

/// The persistence engine underneath the context hierarchy.
///
/// Stores own object graph storage, formats and query execution. The staging
/// layer only needs identity resolution, entity metadata, a coarse fetch and
/// an atomic save.
///
/// # Invariants
///
/// - `save` applies the whole change set or none of it
/// - after `save` returns `Ok`, `fetch` observes the saved state
/// - receipts carry strictly increasing sequences
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For tests and demos
pub trait ObjectStore: Send + Sync {
    /// Returns the metadata of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not part of the model.
    fn entity(&self, name: &str) -> StoreResult<EntityDescription>;

    /// Resolves an identity to its persisted record.
    ///
    /// Returns `Ok(None)` when the store has no such record.
    fn fetch(&self, id: ObjectId) -> StoreResult<Option<Record>>;

    /// Returns every persisted record of an entity.
    fn fetch_all(&self, entity: &str) -> StoreResult<Vec<Record>>;

    /// Durably applies a change set.
    ///
    /// # Errors
    ///
    /// Returns an error if the change set conflicts with stored state or the
    /// underlying medium fails. Nothing is applied in that case.
    fn save(&self, changes: &ChangeSet) -> StoreResult<SaveReceipt>;
}
