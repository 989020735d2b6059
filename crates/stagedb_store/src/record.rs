//! Records, change sets and save receipts.

use crate::id::ObjectId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute name to value map of one object.
pub type Properties = BTreeMap<String, Value>;

/// The persisted state of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identity.
    pub id: ObjectId,
    /// Entity name.
    pub entity: String,
    /// Attribute values.
    pub properties: Properties,
}

impl Record {
    /// Creates a record with no attribute values.
    pub fn new(id: ObjectId, entity: impl Into<String>) -> Self {
        Self {
            id,
            entity: entity.into(),
            properties: Properties::new(),
        }
    }

    /// Sets an attribute value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A normalized set of pending inserts, updates and deletes.
///
/// The set folds successive operations on one identity together:
/// - updating an inserted object keeps it an insert
/// - deleting an inserted object drops it entirely
/// - deleting an updated object turns it into a delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    inserted: BTreeMap<ObjectId, Record>,
    updated: BTreeMap<ObjectId, Record>,
    deleted: BTreeSet<ObjectId>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an insert.
    pub fn insert(&mut self, record: Record) {
        let id = record.id;
        if self.deleted.remove(&id) {
            // Re-inserting something deleted in the same set updates the stored record.
            self.updated.insert(id, record);
        } else {
            self.inserted.insert(id, record);
        }
    }

    /// Records an update carrying the full post-update record.
    pub fn update(&mut self, record: Record) {
        let id = record.id;
        if let Some(existing) = self.inserted.get_mut(&id) {
            *existing = record;
        } else {
            self.updated.insert(id, record);
        }
    }

    /// Records a delete.
    pub fn delete(&mut self, id: ObjectId) {
        if self.inserted.remove(&id).is_some() {
            return;
        }
        self.updated.remove(&id);
        self.deleted.insert(id);
    }

    /// Returns the staged record for an identity, if inserted or updated.
    #[must_use]
    pub fn record(&self, id: ObjectId) -> Option<&Record> {
        self.inserted.get(&id).or_else(|| self.updated.get(&id))
    }

    /// Returns `true` if the identity is staged for deletion.
    #[must_use]
    pub fn is_deleted(&self, id: ObjectId) -> bool {
        self.deleted.contains(&id)
    }

    /// Returns `true` if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Inserted records.
    pub fn inserted(&self) -> impl Iterator<Item = &Record> {
        self.inserted.values()
    }

    /// Updated records.
    pub fn updated(&self) -> impl Iterator<Item = &Record> {
        self.updated.values()
    }

    /// Deleted identities.
    pub fn deleted(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.deleted.iter().copied()
    }

    /// Every identity touched by the set.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.inserted
            .keys()
            .chain(self.updated.keys())
            .copied()
            .chain(self.deleted())
    }

    /// Discards everything.
    pub fn clear(&mut self) {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}

/// The did-save notification produced by a successful store save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    /// Monotonic store sequence of this save.
    pub sequence: u64,
    /// Identities inserted by the save.
    pub inserted: Vec<ObjectId>,
    /// Identities updated by the save.
    pub updated: Vec<ObjectId>,
    /// Identities deleted by the save.
    pub deleted: Vec<ObjectId>,
}

impl SaveReceipt {
    /// Builds the receipt describing `changes`.
    #[must_use]
    pub fn for_changes(sequence: u64, changes: &ChangeSet) -> Self {
        Self {
            sequence,
            inserted: changes.inserted.keys().copied().collect(),
            updated: changes.updated.keys().copied().collect(),
            deleted: changes.deleted.iter().copied().collect(),
        }
    }

    /// Returns `true` if the save touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: ObjectId, salary: i64) -> Record {
        Record::new(id, "Employee").with("salary", salary)
    }

    #[test]
    fn update_after_insert_stays_insert() {
        let id = ObjectId::new();
        let mut set = ChangeSet::new();
        set.insert(record(id, 1));
        set.update(record(id, 2));

        assert_eq!(set.inserted().count(), 1);
        assert_eq!(set.updated().count(), 0);
        assert_eq!(set.record(id).unwrap().get("salary"), Some(&Value::Integer(2)));
    }

    #[test]
    fn delete_after_insert_cancels() {
        let id = ObjectId::new();
        let mut set = ChangeSet::new();
        set.insert(record(id, 1));
        set.delete(id);

        assert!(set.is_empty());
    }

    #[test]
    fn delete_after_update_becomes_delete() {
        let id = ObjectId::new();
        let mut set = ChangeSet::new();
        set.update(record(id, 1));
        set.delete(id);

        assert_eq!(set.len(), 1);
        assert!(set.is_deleted(id));
        assert!(set.record(id).is_none());
    }

    #[test]
    fn receipt_lists_identities() {
        let (a, b, c) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let mut set = ChangeSet::new();
        set.insert(record(a, 1));
        set.update(record(b, 1));
        set.delete(c);

        let receipt = SaveReceipt::for_changes(7, &set);
        assert_eq!(receipt.sequence, 7);
        assert_eq!(receipt.inserted, vec![a]);
        assert_eq!(receipt.updated, vec![b]);
        assert_eq!(receipt.deleted, vec![c]);
    }
}
