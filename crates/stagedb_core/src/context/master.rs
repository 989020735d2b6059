//! The master save context.

use super::merge::{MergePolicy, StagedChanges};
use crate::error::CoreResult;
use crate::feed::{SaveEvent, SaveFeed};
use crate::queue::SerialQueue;
use crate::stats::StackStats;
use crate::types::ContextId;
use parking_lot::Mutex;
use stagedb_store::{ChangeSet, EntityDescription, ObjectId, ObjectStore, Record, SaveReceipt, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Root of the hierarchy and the only writer to the backing store.
///
/// Master keeps no object cache. Reads go straight to the store; changes
/// absorbed from a child live only for the duration of one serialized save,
/// and reads from other threads wait on the queue until that save is done.
pub(crate) struct MasterContext {
    store: Arc<dyn ObjectStore>,
    queue: SerialQueue,
    merge_policy: MergePolicy,
    feed: Arc<SaveFeed>,
    stats: Arc<StackStats>,
    pending: Mutex<ChangeSet>,
}

impl MasterContext {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        merge_policy: MergePolicy,
        feed: Arc<SaveFeed>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            store,
            queue: SerialQueue::new("stagedb.master"),
            merge_policy,
            feed,
            stats,
            pending: Mutex::new(ChangeSet::new()),
        }
    }

    pub(crate) fn entity(&self, name: &str) -> CoreResult<EntityDescription> {
        Ok(self.store.entity(name)?)
    }

    pub(crate) fn has_changes(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Reads one record from the store.
    ///
    /// Runs on master's queue, so it never observes a save half-applied.
    pub(crate) fn fetch_record(&self, id: ObjectId) -> CoreResult<Option<Record>> {
        self.queue.perform_and_wait(|| Ok(self.store.fetch(id)?))
    }

    /// Returns every stored record of an entity, ordered by identity.
    pub(crate) fn fetch_all(&self, entity: &str) -> CoreResult<Vec<Record>> {
        self.queue.perform_and_wait(|| Ok(self.store.fetch_all(entity)?))
    }

    /// Saves a child's staged changes into master, then flushes master.
    ///
    /// Both steps run on master's queue, so saves from different write
    /// contexts never interleave and save events leave in completion order.
    pub(crate) fn save_child(
        &self,
        child: ContextId,
        staged: StagedChanges,
    ) -> CoreResult<Option<SaveReceipt>> {
        self.queue.perform_and_wait(|| {
            if staged.is_empty() {
                debug!(context = %child, "nothing staged, flushing master");
            } else {
                debug!(context = %child, changes = staged.len(), "saving context into master");
            }
            if let Err(err) = self.absorb(staged) {
                self.pending.lock().clear();
                warn!(context = %child, error = %err, "context save rejected");
                return Err(err);
            }
            self.stats.record_context_save();
            self.save()
        })
    }

    /// Flushes pending changes to the store.
    ///
    /// A save with nothing pending performs no store I/O. On failure the
    /// pending changes are discarded so they never reach the store later.
    pub(crate) fn save(&self) -> CoreResult<Option<SaveReceipt>> {
        self.queue.perform_and_wait(|| {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                self.stats.record_noop_save();
                debug!("master has no pending changes, skipping store save");
                return Ok(None);
            }

            let result = self.store.save(&pending);
            let changes = pending.len();
            pending.clear();
            drop(pending);

            match result {
                Ok(receipt) => {
                    self.stats.record_store_save();
                    debug!(sequence = receipt.sequence, changes, "master saved to store");
                    self.feed.emit(SaveEvent::from(&receipt));
                    Ok(Some(receipt))
                }
                Err(err) => {
                    self.stats.record_store_failure();
                    warn!(error = %err, changes, "store save failed, discarding master changes");
                    Err(err.into())
                }
            }
        })
    }

    fn absorb(&self, staged: StagedChanges) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        for record in staged.inserted {
            pending.insert(record);
        }
        for update in staged.updated {
            let id = update.record.id;
            let base = match pending.record(id) {
                Some(record) => record.properties.clone(),
                None => self
                    .store
                    .fetch(id)?
                    .ok_or(StoreError::ObjectNotFound { id })?
                    .properties,
            };
            let properties =
                self.merge_policy
                    .resolve(&base, &update.record.properties, &update.changed);
            pending.update(Record {
                properties,
                ..update.record
            });
        }
        for id in staged.deleted {
            pending.delete(id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MasterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterContext")
            .field("merge_policy", &self.merge_policy)
            .field("has_changes", &self.has_changes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StagedUpdate;
    use stagedb_store::{InMemoryStore, Model, Value};
    use std::collections::BTreeSet;

    fn model() -> Model {
        Model::new().with_entity(
            EntityDescription::new("Employee")
                .attribute("salary", 0)
                .attribute("bonus", 0),
        )
    }

    fn master(store: &Arc<InMemoryStore>, policy: MergePolicy) -> MasterContext {
        MasterContext::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            policy,
            Arc::new(SaveFeed::with_max_history(8)),
            Arc::new(StackStats::new()),
        )
    }

    fn update(record: Record, changed: &[&str]) -> StagedChanges {
        StagedChanges {
            updated: vec![StagedUpdate {
                record,
                changed: changed.iter().map(|k| (*k).to_owned()).collect::<BTreeSet<_>>(),
            }],
            ..StagedChanges::default()
        }
    }

    #[test]
    fn empty_save_is_a_noop() {
        let store = Arc::new(InMemoryStore::new(model()));
        let master = master(&store, MergePolicy::default());

        assert!(master.save().unwrap().is_none());
        assert!(master
            .save_child(ContextId::new(2), StagedChanges::default())
            .unwrap()
            .is_none());
        assert_eq!(store.save_count(), 0);
        assert_eq!(master.stats.snapshot().noop_saves, 2);
    }

    #[test]
    fn saves_emit_events() {
        let store = Arc::new(InMemoryStore::new(model()));
        let master = master(&store, MergePolicy::default());
        let events = master.feed.subscribe();

        let record = Record::new(ObjectId::new(), "Employee").with("salary", 1);
        let staged = StagedChanges {
            inserted: vec![record.clone()],
            ..StagedChanges::default()
        };
        let receipt = master.save_child(ContextId::new(2), staged).unwrap().unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.sequence, receipt.sequence);
        assert_eq!(event.inserted, vec![record.id]);
        assert!(!master.has_changes());
    }

    #[test]
    fn property_trumps_preserves_other_committed_properties() {
        let original = Record::new(ObjectId::new(), "Employee")
            .with("salary", 10)
            .with("bonus", 0);
        let store = Arc::new(InMemoryStore::with_records(model(), [original.clone()]));
        let master = master(&store, MergePolicy::PropertyTrumps);

        // Two contexts started from the same snapshot, each touching one property.
        let salary = original.clone().with("salary", 20);
        let bonus = original.clone().with("bonus", 5);
        master
            .save_child(ContextId::new(2), update(salary, &["salary"]))
            .unwrap();
        master
            .save_child(ContextId::new(3), update(bonus, &["bonus"]))
            .unwrap();

        let stored = store.fetch(original.id).unwrap().unwrap();
        assert_eq!(stored.get("salary"), Some(&Value::Integer(20)));
        assert_eq!(stored.get("bonus"), Some(&Value::Integer(5)));
    }

    #[test]
    fn object_trumps_replaces_whole_records() {
        let original = Record::new(ObjectId::new(), "Employee")
            .with("salary", 10)
            .with("bonus", 0);
        let store = Arc::new(InMemoryStore::with_records(model(), [original.clone()]));
        let master = master(&store, MergePolicy::ObjectTrumps);

        master
            .save_child(ContextId::new(2), update(original.clone().with("salary", 20), &["salary"]))
            .unwrap();
        master
            .save_child(ContextId::new(3), update(original.clone().with("bonus", 5), &["bonus"]))
            .unwrap();

        let stored = store.fetch(original.id).unwrap().unwrap();
        assert_eq!(stored.get("salary"), Some(&Value::Integer(10)));
        assert_eq!(stored.get("bonus"), Some(&Value::Integer(5)));
    }

    #[test]
    fn failed_store_save_discards_absorbed_changes() {
        let store = Arc::new(InMemoryStore::new(model()));
        let master = master(&store, MergePolicy::default());
        store.fail_next_saves(1);

        let staged = StagedChanges {
            inserted: vec![Record::new(ObjectId::new(), "Employee")],
            ..StagedChanges::default()
        };
        assert!(master.save_child(ContextId::new(2), staged).is_err());
        assert!(!master.has_changes());

        // The next save has nothing left over to write.
        assert!(master.save().unwrap().is_none());
        assert_eq!(store.save_count(), 0);
        assert_eq!(master.stats.snapshot().store_failures, 1);
    }

    #[test]
    fn update_of_vanished_record_is_rejected() {
        let store = Arc::new(InMemoryStore::new(model()));
        let master = master(&store, MergePolicy::default());
        let ghost = Record::new(ObjectId::new(), "Employee").with("salary", 1);

        let err = master
            .save_child(ContextId::new(2), update(ghost, &["salary"]))
            .unwrap_err();
        assert!(!err.is_precondition());
        assert!(!master.has_changes());
    }

    #[test]
    fn fetch_reads_through_to_the_store() {
        let record = Record::new(ObjectId::new(), "Employee").with("salary", 3);
        let store = Arc::new(InMemoryStore::with_records(model(), [record.clone()]));
        let master = master(&store, MergePolicy::default());

        assert_eq!(master.fetch_record(record.id).unwrap(), Some(record.clone()));
        assert_eq!(master.fetch_all("Employee").unwrap(), vec![record]);
        assert!(master.fetch_record(ObjectId::new()).unwrap().is_none());
        assert!(master.fetch_all("Manager").is_err());
    }
}
