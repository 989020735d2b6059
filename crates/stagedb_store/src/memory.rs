//! In-memory object store for testing.

use crate::error::{StoreError, StoreResult};
use crate::id::ObjectId;
use crate::model::{EntityDescription, Model};
use crate::record::{ChangeSet, Record, SaveReceipt};
use crate::store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// An in-memory object store.
///
/// This store keeps every record in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Demos that don't need persistence
///
/// It also counts saves and can be told to fail upcoming saves or fetches,
/// which makes the error paths of the commit cascade and of merging
/// observable.
///
/// # Example
///
/// ```rust
/// use stagedb_store::{ChangeSet, InMemoryStore, Model, ObjectStore};
///
/// let store = InMemoryStore::new(Model::new());
/// assert_eq!(store.save_count(), 0);
/// store.fail_next_saves(1);
/// assert!(store.save(&ChangeSet::new()).is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    model: Model,
    records: RwLock<HashMap<ObjectId, Record>>,
    sequence: AtomicU64,
    saves: AtomicU64,
    failures_pending: AtomicUsize,
    fetch_failures_pending: AtomicUsize,
}

impl InMemoryStore {
    /// Creates an empty store for a model.
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Creates a store pre-populated with records.
    ///
    /// Useful for starting a stack on top of existing data.
    #[must_use]
    pub fn with_records(model: Model, records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new(model);
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.id, record);
            }
        }
        store
    }

    /// Returns how many saves completed successfully.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Makes the next `count` saves fail with an I/O error.
    pub fn fail_next_saves(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` single-record fetches fail with an I/O error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.fetch_failures_pending.store(count, Ordering::SeqCst);
    }

    /// Removes a record behind the staging layer's back.
    ///
    /// Simulates another process deleting the backing record.
    pub fn remove(&self, id: ObjectId) -> Option<Record> {
        self.records.write().remove(&id)
    }

    fn take_injected_failure(pending: &AtomicUsize) -> bool {
        pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn validate(&self, records: &HashMap<ObjectId, Record>, changes: &ChangeSet) -> StoreResult<()> {
        for record in changes.inserted() {
            self.model.entity(&record.entity)?;
            if records.contains_key(&record.id) {
                return Err(StoreError::DuplicateObject { id: record.id });
            }
        }
        for record in changes.updated() {
            self.model.entity(&record.entity)?;
            if !records.contains_key(&record.id) {
                return Err(StoreError::ObjectNotFound { id: record.id });
            }
        }
        Ok(())
    }
}

impl ObjectStore for InMemoryStore {
    fn entity(&self, name: &str) -> StoreResult<EntityDescription> {
        self.model.entity(name).cloned()
    }

    fn fetch(&self, id: ObjectId) -> StoreResult<Option<Record>> {
        if Self::take_injected_failure(&self.fetch_failures_pending) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected fetch failure",
            )));
        }
        Ok(self.records.read().get(&id).cloned())
    }

    fn fetch_all(&self, entity: &str) -> StoreResult<Vec<Record>> {
        self.model.entity(entity)?;
        let mut found: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| r.entity == entity)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    fn save(&self, changes: &ChangeSet) -> StoreResult<SaveReceipt> {
        if Self::take_injected_failure(&self.failures_pending) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected save failure",
            )));
        }

        let mut records = self.records.write();
        self.validate(&records, changes)?;

        for record in changes.inserted().chain(changes.updated()) {
            records.insert(record.id, record.clone());
        }
        for id in changes.deleted() {
            // Deleting an already-missing record is not an error.
            records.remove(&id);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(SaveReceipt::for_changes(sequence, changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn model() -> Model {
        Model::new().with_entity(EntityDescription::new("Employee").attribute("salary", 0))
    }

    fn employee(salary: i64) -> Record {
        Record::new(ObjectId::new(), "Employee").with("salary", salary)
    }

    #[test]
    fn save_then_fetch() {
        let store = InMemoryStore::new(model());
        let record = employee(10);
        let mut changes = ChangeSet::new();
        changes.insert(record.clone());

        let receipt = store.save(&changes).unwrap();
        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.inserted, vec![record.id]);
        assert_eq!(store.fetch(record.id).unwrap(), Some(record));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn sequences_increase() {
        let store = InMemoryStore::new(model());
        let first = store.save(&ChangeSet::new()).unwrap();
        let second = store.save(&ChangeSet::new()).unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn duplicate_insert_is_rejected_atomically() {
        let existing = employee(1);
        let store = InMemoryStore::with_records(model(), [existing.clone()]);

        let fresh = employee(2);
        let mut changes = ChangeSet::new();
        changes.insert(fresh.clone());
        changes.insert(existing.clone());

        let result = store.save(&changes);
        assert!(matches!(result, Err(StoreError::DuplicateObject { .. })));
        assert!(store.fetch(fresh.id).unwrap().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn update_of_missing_record_is_rejected() {
        let store = InMemoryStore::new(model());
        let mut changes = ChangeSet::new();
        changes.update(employee(1));
        assert!(matches!(
            store.save(&changes),
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let store = InMemoryStore::new(model());
        let mut changes = ChangeSet::new();
        changes.insert(Record::new(ObjectId::new(), "Manager"));
        assert!(matches!(
            store.save(&changes),
            Err(StoreError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = InMemoryStore::new(model());
        store.fail_next_saves(2);

        assert!(matches!(store.save(&ChangeSet::new()), Err(StoreError::Io(_))));
        assert!(matches!(store.save(&ChangeSet::new()), Err(StoreError::Io(_))));
        assert!(store.save(&ChangeSet::new()).is_ok());
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn injected_fetch_failures_are_consumed() {
        let record = employee(1);
        let store = InMemoryStore::with_records(model(), [record.clone()]);
        store.fail_next_fetches(1);

        assert!(matches!(store.fetch(record.id), Err(StoreError::Io(_))));
        assert_eq!(store.fetch(record.id).unwrap(), Some(record));
    }

    #[test]
    fn fetch_all_filters_by_entity() {
        let store = InMemoryStore::with_records(
            model().with_entity(EntityDescription::new("Team")),
            [employee(1), employee(2), Record::new(ObjectId::new(), "Team")],
        );
        let employees = store.fetch_all("Employee").unwrap();
        assert_eq!(employees.len(), 2);
        assert!(employees
            .iter()
            .all(|r| matches!(r.get("salary"), Some(Value::Integer(_)))));
    }

    #[test]
    fn remove_behind_the_back() {
        let record = employee(1);
        let store = InMemoryStore::with_records(model(), [record.clone()]);
        assert!(store.remove(record.id).is_some());
        assert!(store.fetch(record.id).unwrap().is_none());
    }
}
