//! The context hierarchy.
//!
//! Contexts form a strict tree:
//!
//! ```text
//! master ──┬── read          (main thread, write-protected)
//!          ├── write 1       (transaction queue)
//!          └── write N
//! ```
//!
//! Master is the only context that talks to the backing store. The read
//! context and the write contexts stage objects on top of master; a write
//! context's staged inserts, updates and deletes reach master only when the
//! context is saved, so siblings never see each other's uncommitted state.

mod hierarchy;
mod master;
mod merge;
mod read;

pub(crate) use hierarchy::{ContextRegistry, Hierarchy};
pub(crate) use master::MasterContext;
pub use merge::MergePolicy;
pub(crate) use merge::{StagedChanges, StagedUpdate};
pub use read::ReadContext;

use crate::binding::ThreadBindings;
use crate::error::{CoreResult, Violation};
use crate::object::{ManagedObject, Owner};
use crate::queue::SerialQueue;
use crate::types::{ContextId, ContextKind};
use parking_lot::Mutex;
use stagedb_store::{EntityDescription, ObjectId, Record, SaveReceipt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct StagingState {
    /// Objects registered in this context, by identity.
    objects: HashMap<ObjectId, ManagedObject>,
    inserted: BTreeSet<ObjectId>,
    updated: BTreeSet<ObjectId>,
    deleted: BTreeSet<ObjectId>,
}

/// A staging context: the read context or a transaction's write context.
///
/// A context registers at most one object per identity and tracks the
/// inserts, updates and deletes staged relative to its parent. Its parent is
/// always master and never changes.
pub struct Context {
    id: ContextId,
    kind: ContextKind,
    parent: Arc<MasterContext>,
    bindings: Arc<ThreadBindings>,
    queue: SerialQueue,
    state: Mutex<StagingState>,
    self_ref: Weak<Context>,
}

impl Context {
    pub(crate) fn new(
        id: ContextId,
        kind: ContextKind,
        parent: Arc<MasterContext>,
        bindings: Arc<ThreadBindings>,
        label: String,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            kind,
            parent,
            bindings,
            queue: SerialQueue::new(label),
            state: Mutex::new(StagingState::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the context ID.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the context's role.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Returns the parent context ID, which is always master.
    #[must_use]
    pub fn parent_id(&self) -> ContextId {
        ContextId::MASTER
    }

    /// Returns `true` if inserts, updates or deletes are staged.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let state = self.state.lock();
        !(state.inserted.is_empty() && state.updated.is_empty() && state.deleted.is_empty())
    }

    /// Returns the number of registered objects.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Returns the label of the context's serial queue.
    #[must_use]
    pub fn label(&self) -> &str {
        self.queue.label()
    }

    pub(crate) fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    pub(crate) fn parent(&self) -> &Arc<MasterContext> {
        &self.parent
    }

    fn owner(&self) -> Owner {
        Owner {
            id: self.id,
            kind: self.kind,
            context: self.self_ref.clone(),
            bindings: Arc::clone(&self.bindings),
        }
    }

    /// Creates and registers a new object with the entity's default values.
    pub(crate) fn create(&self, entity: &str) -> CoreResult<ManagedObject> {
        let description = self.parent.entity(entity)?;
        let id = ObjectId::new();
        let record = Record {
            id,
            entity: entity.to_owned(),
            properties: description.defaults(),
        };
        let object = ManagedObject::materialized(description, record, self.owner());
        object.mark_all_changed();

        let mut state = self.state.lock();
        state.objects.insert(id, object.clone());
        state.inserted.insert(id);
        Ok(object)
    }

    /// Inserts a transient object.
    ///
    /// The object gets an identity, is refreshed with the entity defaults and
    /// then gets its own values back on top.
    pub(crate) fn insert(&self, object: &ManagedObject) -> CoreResult<()> {
        let own = object.properties()?;
        let id = ObjectId::new();
        object.adopt(self.owner(), id)?;

        let mut merged = object.description().defaults();
        merged.extend(own);
        object.populate(merged);
        object.mark_all_changed();

        let mut state = self.state.lock();
        state.objects.insert(id, object.clone());
        state.inserted.insert(id);
        Ok(())
    }

    /// Deletes a registered object.
    ///
    /// Deleting an object inserted in this same context forgets it entirely.
    pub(crate) fn delete(&self, object: &ManagedObject) -> CoreResult<()> {
        let id = object.id().ok_or(Violation::TransientObject {
            operation: "delete",
        })?;
        {
            let mut state = self.state.lock();
            state.objects.remove(&id);
            state.updated.remove(&id);
            if !state.inserted.remove(&id) {
                state.deleted.insert(id);
            }
        }
        object.mark_deleted();
        Ok(())
    }

    /// Records that a registered object's values changed.
    pub(crate) fn note_updated(&self, id: ObjectId) {
        let mut state = self.state.lock();
        if state.objects.contains_key(&id) && !state.inserted.contains(&id) {
            state.updated.insert(id);
        }
    }

    pub(crate) fn registered(&self, id: ObjectId) -> Option<ManagedObject> {
        self.state.lock().objects.get(&id).cloned()
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        self.state.lock().objects.contains_key(&id)
    }

    pub(crate) fn unregister(&self, id: ObjectId) -> Option<ManagedObject> {
        self.state.lock().objects.remove(&id)
    }

    /// Registers a fault unless the identity is already registered.
    pub(crate) fn register_fault(&self, id: ObjectId, description: EntityDescription) {
        let owner = self.owner();
        self.state
            .lock()
            .objects
            .entry(id)
            .or_insert_with(|| ManagedObject::fault(description, id, owner));
    }

    fn register_record(&self, description: EntityDescription, record: Record) -> ManagedObject {
        let owner = self.owner();
        self.state
            .lock()
            .objects
            .entry(record.id)
            .or_insert_with(|| ManagedObject::materialized(description, record, owner))
            .clone()
    }

    /// Resolves an identity, registering the object on first use.
    pub(crate) fn fetch(&self, id: ObjectId) -> CoreResult<Option<ManagedObject>> {
        {
            let state = self.state.lock();
            if let Some(object) = state.objects.get(&id) {
                return Ok(Some(object.clone()));
            }
            if state.deleted.contains(&id) {
                return Ok(None);
            }
        }
        let Some(record) = self.parent.fetch_record(id)? else {
            return Ok(None);
        };
        let description = self.parent.entity(&record.entity)?;
        Ok(Some(self.register_record(description, record)))
    }

    /// Returns every object of an entity, ordered by identity.
    ///
    /// The read context hands out faults for objects it has not registered
    /// yet; write contexts materialize them. Objects staged in this context
    /// are included and objects deleted in it are not.
    pub(crate) fn fetch_all(&self, entity: &str) -> CoreResult<Vec<ManagedObject>> {
        let description = self.parent.entity(entity)?;
        let records = self.parent.fetch_all(entity)?;
        let owner = self.owner();

        let mut state = self.state.lock();
        let mut found = Vec::with_capacity(records.len());
        for record in records {
            if state.deleted.contains(&record.id) {
                continue;
            }
            let id = record.id;
            let object = state
                .objects
                .entry(id)
                .or_insert_with(|| match self.kind {
                    ContextKind::Write => {
                        ManagedObject::materialized(description.clone(), record, owner.clone())
                    }
                    _ => ManagedObject::fault(description.clone(), id, owner.clone()),
                })
                .clone();
            found.push(object);
        }
        for id in &state.inserted {
            if let Some(object) = state.objects.get(id) {
                if object.entity() == entity && !found.iter().any(|o| o.same_object(object)) {
                    found.push(object.clone());
                }
            }
        }
        found.sort_by_key(ManagedObject::id);
        Ok(found)
    }

    /// Loads the parent's current record for a fault.
    pub(crate) fn load_record(&self, id: ObjectId) -> CoreResult<Option<Record>> {
        self.parent.fetch_record(id)
    }

    /// Resolves an object from another context by identity.
    ///
    /// A write context refreshes its registered copy, discarding local edits.
    /// The read context hands out its registered copy untouched; that copy
    /// only changes when a save is merged. Returns `None` when the parent has
    /// no such record.
    pub(crate) fn transplant(
        &self,
        id: ObjectId,
        description: EntityDescription,
    ) -> CoreResult<Option<ManagedObject>> {
        if self.kind == ContextKind::Read {
            if let Some(object) = self.registered(id) {
                return Ok(Some(object));
            }
        }
        if self.state.lock().deleted.contains(&id) {
            return Ok(None);
        }
        let Some(record) = self.parent.fetch_record(id)? else {
            return Ok(None);
        };
        if let Some(object) = self.registered(id) {
            object.populate(record.properties);
            self.state.lock().updated.remove(&id);
            return Ok(Some(object));
        }
        Ok(Some(self.register_record(description, record)))
    }

    /// Loads an object about to be merged so the merge sees it.
    ///
    /// Unregistered identities are registered with their current values and
    /// registered faults are filled in.
    pub(crate) fn prefault(&self, id: ObjectId) -> CoreResult<()> {
        match self.registered(id) {
            Some(object) if object.is_fault() => {
                if let Some(record) = self.parent.fetch_record(id)? {
                    object.populate(record.properties);
                }
            }
            Some(_) => {}
            None => {
                if let Some(record) = self.parent.fetch_record(id)? {
                    let description = self.parent.entity(&record.entity)?;
                    self.register_record(description, record);
                }
            }
        }
        Ok(())
    }

    /// Collects everything staged in this context.
    pub(crate) fn staged_changes(&self) -> StagedChanges {
        let state = self.state.lock();
        let inserted = state
            .inserted
            .iter()
            .filter_map(|id| state.objects.get(id))
            .filter_map(ManagedObject::record)
            .collect();
        let updated = state
            .updated
            .iter()
            .filter_map(|id| state.objects.get(id))
            .filter_map(|object| {
                object.record().map(|record| StagedUpdate {
                    record,
                    changed: object.changed_keys(),
                })
            })
            .collect();
        StagedChanges {
            inserted,
            updated,
            deleted: state.deleted.iter().copied().collect(),
        }
    }

    /// Forgets staged changes after they reached the parent.
    fn did_save(&self) {
        let mut state = self.state.lock();
        for id in state.inserted.iter().chain(state.updated.iter()) {
            if let Some(object) = state.objects.get(id) {
                object.clear_changes();
            }
        }
        state.inserted.clear();
        state.updated.clear();
        state.deleted.clear();
    }

    /// Saves this write context into master and flushes master.
    ///
    /// Returns the store receipt, or `None` when there was nothing to write.
    /// On failure the staged changes stay in place.
    pub(crate) fn save(&self) -> CoreResult<Option<SaveReceipt>> {
        if self.kind != ContextKind::Write {
            return Err(Violation::NotAWriteContext.into());
        }
        self.queue.perform_and_wait(|| {
            let staged = self.staged_changes();
            let receipt = self.parent.save_child(self.id, staged)?;
            self.did_save();
            Ok(receipt)
        })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("registered", &self.registered_count())
            .field("has_changes", &self.has_changes())
            .finish()
    }
}
