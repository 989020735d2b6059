//! Transaction state and the handle passed to transaction bodies.

use crate::context::{Context, Hierarchy};
use crate::error::CoreResult;
use crate::guards;
use crate::object::ManagedObject;
use crate::transaction::runner;
use crate::types::{ContextId, TransactionId};
use stagedb_store::{ObjectId, SaveReceipt};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

/// State of a transaction.
///
/// ```text
/// Created → Bound → Running → Cancelled ──────────────────────────┐
///                          └→ ImplicitCommitPending → Committed → Closed
/// ```
///
/// A body returning an error goes from `Running` straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The write context exists but is not attached yet.
    Created,
    /// The write context is attached to the executing thread.
    Bound,
    /// The body is running.
    Running,
    /// The implicit commit was cancelled.
    Cancelled,
    /// The body finished and the implicit commit is about to run.
    ImplicitCommitPending,
    /// The implicit commit finished.
    Committed,
    /// The previous binding has been restored.
    Closed,
}

/// A running transaction, as seen from inside its body.
///
/// The handle is tied to the thread executing the body: it is neither
/// `Send` nor `Sync`. Every operation is checked against that thread's
/// binding exactly as the equivalent [`crate::Stack`] call would be.
pub struct Transaction<'a> {
    id: TransactionId,
    hierarchy: &'a Hierarchy,
    context: Arc<Context>,
    state: Cell<TransactionState>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(id: TransactionId, hierarchy: &'a Hierarchy, context: Arc<Context>) -> Self {
        Self {
            id,
            hierarchy,
            context,
            state: Cell::new(TransactionState::Created),
            _thread_bound: PhantomData,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state.get()
    }

    /// Returns the ID of the transaction's write context.
    #[must_use]
    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    /// Returns the transaction's write context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        self.state.set(state);
    }

    /// Creates a new object in the write context.
    ///
    /// # Errors
    ///
    /// Fails for unknown entities, or when called from a thread the write
    /// context is not attached to.
    pub fn create(&self, entity: &str) -> CoreResult<ManagedObject> {
        guards::create(self.hierarchy, entity, false)
    }

    /// Creates a transient object with no context and no identity.
    ///
    /// # Errors
    ///
    /// Fails for unknown entities.
    pub fn create_transient(&self, entity: &str) -> CoreResult<ManagedObject> {
        guards::create(self.hierarchy, entity, true)
    }

    /// Inserts a transient object into the write context.
    ///
    /// Inserting an object the context already owns does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the object belongs to another context.
    pub fn insert(&self, object: &ManagedObject) -> CoreResult<()> {
        guards::insert(self.hierarchy, object)
    }

    /// Deletes an object owned by the write context.
    ///
    /// # Errors
    ///
    /// Fails if the object has no context or belongs to another one.
    pub fn delete(&self, object: &ManagedObject) -> CoreResult<()> {
        guards::delete(self.hierarchy, object)
    }

    /// Resolves an object from another context in the write context.
    ///
    /// Returns `Ok(None)` if the backing record no longer exists.
    ///
    /// # Errors
    ///
    /// Fails for transient objects and when the source context has unsaved
    /// changes.
    pub fn use_in_current_context(&self, object: &ManagedObject) -> CoreResult<Option<ManagedObject>> {
        guards::use_in_current_context(self.hierarchy, object)
    }

    /// Resolves an identity in the write context.
    ///
    /// Objects staged in this transaction are visible; nothing staged by
    /// other transactions is.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read.
    pub fn fetch(&self, id: ObjectId) -> CoreResult<Option<ManagedObject>> {
        guards::current_transaction_context(self.hierarchy)?;
        self.context.fetch(id)
    }

    /// Returns every object of an entity in the write context.
    ///
    /// # Errors
    ///
    /// Fails for unknown entities or if the store cannot be read.
    pub fn fetch_all(&self, entity: &str) -> CoreResult<Vec<ManagedObject>> {
        guards::current_transaction_context(self.hierarchy)?;
        self.context.fetch_all(entity)
    }

    /// Saves everything staged so far through to the store.
    ///
    /// Each call is a durable checkpoint; a later
    /// [`Transaction::cancel_implicit_commit`] does not undo it.
    ///
    /// # Errors
    ///
    /// Returns the store error if the save fails.
    pub fn commit(&self) -> CoreResult<Option<SaveReceipt>> {
        runner::commit_attached(self.hierarchy)
    }

    /// Skips the implicit commit at the end of the body.
    ///
    /// The transaction stays `Running` until the body returns and only then
    /// moves to `Cancelled`.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction.
    pub fn cancel_implicit_commit(&self) -> CoreResult<()> {
        runner::cancel_implicit_commit(self.hierarchy)
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("context", &self.context.id())
            .field("state", &self.state.get())
            .finish()
    }
}
