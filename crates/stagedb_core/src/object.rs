//! Capability-checked handles to persisted objects.
//!
//! A [`ManagedObject`] is owned by at most one context. Every read and write
//! validates the calling thread against that owner:
//! - objects of the read context are only reachable from the main thread and
//!   are immutable outside a merge
//! - objects of a write context are only reachable from the thread the
//!   context is attached to
//! - transient objects have no owner and no identity and are usable anywhere

use crate::binding::{Current, ThreadBindings};
use crate::context::Context;
use crate::error::{CoreResult, Violation};
use crate::types::{ContextId, ContextKind};
use parking_lot::RwLock;
use stagedb_store::{EntityDescription, ObjectId, Properties, Record, StoreError, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

/// The context owning an object.
#[derive(Clone)]
pub(crate) struct Owner {
    pub(crate) id: ContextId,
    pub(crate) kind: ContextKind,
    pub(crate) context: Weak<Context>,
    pub(crate) bindings: Arc<ThreadBindings>,
}

impl Owner {
    /// Validates that the calling thread may touch objects of this owner.
    fn check_access(&self, operation: &'static str) -> CoreResult<()> {
        match self.kind {
            ContextKind::Read | ContextKind::Master => {
                if self.bindings.is_main_thread() {
                    Ok(())
                } else {
                    Err(Violation::NotMainThread { operation }.into())
                }
            }
            ContextKind::Write => match self.bindings.current() {
                Current::Attached(context) if context.id() == self.id => Ok(()),
                Current::Unbound => Err(Violation::NoContext { operation }.into()),
                _ => Err(Violation::CrossContext { operation }.into()),
            },
        }
    }
}

struct ObjectData {
    id: Option<ObjectId>,
    owner: Option<Owner>,
    properties: Properties,
    changed: BTreeSet<String>,
    fault: bool,
    deleted: bool,
}

struct ObjectInner {
    entity: EntityDescription,
    data: RwLock<ObjectData>,
}

/// A handle to one object in one context.
///
/// Clones share state: a change made through one clone is visible through
/// all of them.
#[derive(Clone)]
pub struct ManagedObject {
    inner: Arc<ObjectInner>,
}

impl ManagedObject {
    fn with_data(entity: EntityDescription, data: ObjectData) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                entity,
                data: RwLock::new(data),
            }),
        }
    }

    /// Creates a transient object: no context, no identity, default values.
    pub(crate) fn transient(entity: EntityDescription) -> Self {
        let properties = entity.defaults();
        Self::with_data(
            entity,
            ObjectData {
                id: None,
                owner: None,
                properties,
                changed: BTreeSet::new(),
                fault: false,
                deleted: false,
            },
        )
    }

    /// Creates an object holding `record`'s values.
    pub(crate) fn materialized(entity: EntityDescription, record: Record, owner: Owner) -> Self {
        Self::with_data(
            entity,
            ObjectData {
                id: Some(record.id),
                owner: Some(owner),
                properties: record.properties,
                changed: BTreeSet::new(),
                fault: false,
                deleted: false,
            },
        )
    }

    /// Creates a fault whose values load on first access.
    pub(crate) fn fault(entity: EntityDescription, id: ObjectId, owner: Owner) -> Self {
        Self::with_data(
            entity,
            ObjectData {
                id: Some(id),
                owner: Some(owner),
                properties: Properties::new(),
                changed: BTreeSet::new(),
                fault: true,
                deleted: false,
            },
        )
    }

    /// Returns the object's identity, or `None` while transient.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        self.inner.data.read().id
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        self.inner.entity.name()
    }

    /// Returns the entity metadata.
    #[must_use]
    pub fn description(&self) -> &EntityDescription {
        &self.inner.entity
    }

    /// Returns the owning context, or `None` while transient.
    #[must_use]
    pub fn context_id(&self) -> Option<ContextId> {
        self.inner.data.read().owner.as_ref().map(|o| o.id)
    }

    /// Returns `true` if the object has no context.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.inner.data.read().owner.is_none()
    }

    /// Returns `true` if the object's values have not been loaded yet.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.inner.data.read().fault
    }

    /// Returns `true` once the object has been deleted from its context.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.data.read().deleted
    }

    /// Returns `true` if the object has property changes not yet saved.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.inner.data.read().changed.is_empty()
    }

    /// Returns `true` if both handles refer to the same object instance.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads one attribute, loading the object's values if it is a fault.
    ///
    /// Unset attributes read as [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Fails if the calling thread may not access the object's context, if
    /// the entity has no such attribute, or if the backing record is gone.
    pub fn get(&self, key: &str) -> CoreResult<Value> {
        self.check_access("get")?;
        self.check_attribute(key)?;
        self.fire_fault()?;
        Ok(self
            .inner
            .data
            .read()
            .properties
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    /// Returns a snapshot of every attribute value.
    ///
    /// # Errors
    ///
    /// Same as [`ManagedObject::get`].
    pub fn properties(&self) -> CoreResult<Properties> {
        self.check_access("properties")?;
        self.fire_fault()?;
        Ok(self.inner.data.read().properties.clone())
    }

    /// Sets one attribute.
    ///
    /// # Errors
    ///
    /// Fails if the calling thread may not access the object's context, if
    /// the object belongs to the read context, if it has been deleted, or if
    /// the entity has no such attribute.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        let owner = self.owner();
        if let Some(owner) = &owner {
            owner.check_access("set")?;
            if owner.kind != ContextKind::Write && !owner.bindings.inside_merge() {
                return Err(Violation::ReadOnlyObject {
                    id: self.required_id()?,
                }
                .into());
            }
        }
        self.check_attribute(key)?;
        self.fire_fault()?;

        let id = {
            let mut data = self.inner.data.write();
            if data.deleted {
                if let Some(id) = data.id {
                    return Err(Violation::DeletedObject { id }.into());
                }
            }
            data.properties.insert(key.to_owned(), value.into());
            data.changed.insert(key.to_owned());
            data.id
        };

        if let (Some(owner), Some(id)) = (owner, id) {
            if owner.kind == ContextKind::Write {
                if let Some(context) = owner.context.upgrade() {
                    context.note_updated(id);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        self.inner.data.read().owner.clone()
    }

    /// Gives a transient object an owner and an identity.
    ///
    /// Only the first adoption succeeds; the owner check and the assignment
    /// happen under one write lock.
    pub(crate) fn adopt(&self, owner: Owner, id: ObjectId) -> CoreResult<()> {
        let mut data = self.inner.data.write();
        if data.owner.is_some() {
            return Err(Violation::CrossContext { operation: "insert" }.into());
        }
        data.owner = Some(owner);
        data.id = Some(id);
        Ok(())
    }

    /// Returns the current values as a record.
    ///
    /// Faults and transient objects have no record.
    pub(crate) fn record(&self) -> Option<Record> {
        let data = self.inner.data.read();
        if data.fault {
            return None;
        }
        data.id.map(|id| Record {
            id,
            entity: self.inner.entity.name().to_owned(),
            properties: data.properties.clone(),
        })
    }

    pub(crate) fn changed_keys(&self) -> BTreeSet<String> {
        self.inner.data.read().changed.clone()
    }

    /// Marks every attribute as changed.
    pub(crate) fn mark_all_changed(&self) {
        let mut data = self.inner.data.write();
        let keys: Vec<String> = data.properties.keys().cloned().collect();
        data.changed.extend(keys);
    }

    pub(crate) fn clear_changes(&self) {
        self.inner.data.write().changed.clear();
    }

    /// Replaces the values without access checks or change tracking.
    ///
    /// Used when a context loads or refreshes an object from its parent.
    pub(crate) fn populate(&self, properties: Properties) {
        let mut data = self.inner.data.write();
        data.properties = properties;
        data.changed.clear();
        data.fault = false;
    }

    /// Overwrites the values of a read-context object during a merge.
    ///
    /// Returns `true` if a materialized object's values changed.
    pub(crate) fn overwrite(&self, properties: Properties) -> CoreResult<bool> {
        if let Some(owner) = self.owner() {
            if owner.kind == ContextKind::Read && !owner.bindings.inside_merge() {
                return Err(Violation::ReadOnlyObject {
                    id: self.required_id()?,
                }
                .into());
            }
        }
        let mut data = self.inner.data.write();
        let changed = !data.fault && data.properties != properties;
        data.properties = properties;
        data.changed.clear();
        data.fault = false;
        Ok(changed)
    }

    pub(crate) fn mark_deleted(&self) {
        let mut data = self.inner.data.write();
        data.deleted = true;
        data.changed.clear();
    }

    fn check_access(&self, operation: &'static str) -> CoreResult<()> {
        match self.owner() {
            Some(owner) => owner.check_access(operation),
            None => Ok(()),
        }
    }

    fn check_attribute(&self, key: &str) -> CoreResult<()> {
        if self.inner.entity.has_attribute(key) {
            Ok(())
        } else {
            Err(Violation::UnknownAttribute {
                entity: self.inner.entity.name().to_owned(),
                attribute: key.to_owned(),
            }
            .into())
        }
    }

    fn required_id(&self) -> CoreResult<ObjectId> {
        self.id().ok_or_else(|| {
            Violation::TransientObject {
                operation: "identity",
            }
            .into()
        })
    }

    /// Loads a fault's values from its owning context.
    fn fire_fault(&self) -> CoreResult<()> {
        let (id, owner) = {
            let data = self.inner.data.read();
            if !data.fault {
                return Ok(());
            }
            match (data.id, data.owner.clone()) {
                (Some(id), Some(owner)) => (id, owner),
                _ => return Ok(()),
            }
        };

        let context = owner
            .context
            .upgrade()
            .ok_or(Violation::Unowned { operation: "fault" })?;
        match context.load_record(id)? {
            Some(record) => {
                let mut data = self.inner.data.write();
                // Another handle may have filled it in meanwhile.
                if data.fault {
                    data.properties = record.properties;
                    data.fault = false;
                }
                Ok(())
            }
            None => Err(StoreError::ObjectNotFound { id }.into()),
        }
    }
}

impl std::fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.read();
        f.debug_struct("ManagedObject")
            .field("entity", &self.inner.entity.name())
            .field("id", &data.id)
            .field("context", &data.owner.as_ref().map(|o| o.id))
            .field("fault", &data.fault)
            .field("deleted", &data.deleted)
            .finish()
    }
}
