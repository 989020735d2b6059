//! Main-thread access to the read context.

use super::{Context, Hierarchy};
use crate::error::CoreResult;
use crate::object::ManagedObject;
use crate::types::ContextId;
use stagedb_store::ObjectId;
use std::marker::PhantomData;
use std::sync::Arc;

/// A handle to the read context, only obtainable on the main thread.
///
/// Objects it returns are immutable to callers and are kept current by
/// change propagation. The handle cannot leave the main thread.
pub struct ReadContext<'a> {
    context: &'a Arc<Context>,
    _main_thread: PhantomData<*const ()>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(hierarchy: &'a Hierarchy) -> CoreResult<Self> {
        hierarchy.require_main("read_context")?;
        Ok(Self {
            context: &hierarchy.read,
            _main_thread: PhantomData,
        })
    }

    /// Returns the read context's ID.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.context.id()
    }

    /// Resolves an identity to a materialized object.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    pub fn fetch(&self, id: ObjectId) -> CoreResult<Option<ManagedObject>> {
        let object = self.context.fetch(id)?;
        if let Some(object) = &object {
            // Load the values now rather than on first access.
            object.properties()?;
        }
        Ok(object)
    }

    /// Returns every object of an entity as faults, ordered by identity.
    ///
    /// # Errors
    ///
    /// Fails for unknown entities or if the store cannot be read.
    pub fn fetch_all(&self, entity: &str) -> CoreResult<Vec<ManagedObject>> {
        self.context.fetch_all(entity)
    }

    /// Returns `true` if the identity is registered in the read context.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.context.contains(id)
    }

    /// Returns the number of registered objects.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.context.registered_count()
    }
}

impl std::fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadContext")
            .field("registered", &self.registered_count())
            .finish()
    }
}
