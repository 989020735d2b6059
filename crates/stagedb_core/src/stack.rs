//! Stack facade.

use crate::binding::ThreadBindings;
use crate::config::Config;
use crate::context::{Context, ContextRegistry, Hierarchy, ReadContext};
use crate::error::CoreResult;
use crate::feed::SaveEvent;
use crate::guards;
use crate::object::ManagedObject;
use crate::propagation::{self, ChangeKind, HandlerId, MergeReport};
use crate::stats::{StackStats, StatsSnapshot};
use crate::transaction::{self, Transaction, TransactionHandle};
use stagedb_store::{ObjectStore, SaveReceipt};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The main StageDB handle.
///
/// `Stack` owns the context hierarchy for one backing store. It provides:
/// - Transactions on isolated write contexts
/// - The commit cascade into the store
/// - Change propagation into the main thread's read context
/// - Lifecycle guards for objects
///
/// Handles are cheap to clone and all clones share one hierarchy.
///
/// # Initialization
///
/// A stack is built unconfigured and initialized exactly once. The thread
/// calling [`Stack::initialize`] becomes the main thread:
///
/// ```rust,ignore
/// use stagedb_core::Stack;
/// use stagedb_store::InMemoryStore;
/// use std::sync::Arc;
///
/// let stack = Stack::new(Arc::new(InMemoryStore::new(model)));
/// stack.initialize()?;
///
/// let id = stack
///     .transact(|tx| {
///         let employee = tx.create("Employee")?;
///         employee.set("salary", 10_000)?;
///         Ok(employee.id())
///     })?
///     .join()?;
///
/// stack.wait_for_changes(Duration::from_secs(1))?;
/// let employee = stack.read_context()?.fetch(id.unwrap())?;
/// ```
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

struct StackInner {
    store: Arc<dyn ObjectStore>,
    config: Config,
    stats: Arc<StackStats>,
    registry: ContextRegistry,
}

impl Stack {
    /// Creates an uninitialized stack over a store with default configuration.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Creates an uninitialized stack over a store.
    pub fn with_config(store: Arc<dyn ObjectStore>, config: Config) -> Self {
        Self {
            inner: Arc::new(StackInner {
                store,
                config,
                stats: Arc::new(StackStats::new()),
                registry: ContextRegistry::new(),
            }),
        }
    }

    /// Builds master and the read context.
    ///
    /// The calling thread becomes the main thread.
    ///
    /// # Errors
    ///
    /// Fails if the stack was already initialized.
    pub fn initialize(&self) -> CoreResult<()> {
        let hierarchy = self.inner.registry.initialize(|| {
            Hierarchy::new(
                Arc::clone(&self.inner.store),
                self.inner.config.clone(),
                Arc::clone(&self.inner.stats),
            )
        })?;
        info!(
            main_thread = ?hierarchy.bindings.main_thread(),
            merge_policy = ?hierarchy.config.merge_policy,
            "stack initialized"
        );
        Ok(())
    }

    /// Returns `true` once [`Stack::initialize`] succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.registry.is_initialized()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.store
    }

    fn hierarchy(&self) -> CoreResult<&Hierarchy> {
        self.inner.registry.get()
    }

    /// Returns the thread binding table.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub fn thread_bindings(&self) -> CoreResult<&ThreadBindings> {
        Ok(&self.hierarchy()?.bindings)
    }

    /// Returns `true` when called on the main thread of an initialized stack.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        self.hierarchy()
            .is_ok_and(|h| h.bindings.is_main_thread())
    }

    // ---- transactions ----

    /// Runs `op` asynchronously in a new transaction.
    ///
    /// The body runs on a dedicated queue thread, never on the main thread,
    /// and is implicitly committed when it returns `Ok` unless it cancelled
    /// the implicit commit. This call never blocks.
    ///
    /// # Errors
    ///
    /// Fails before initialization or if the queue thread cannot start.
    pub fn transact<T, F>(&self, op: F) -> CoreResult<TransactionHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> CoreResult<T> + Send + 'static,
    {
        let hierarchy = self.hierarchy()?;
        let id = hierarchy.next_transaction_id();
        let context = hierarchy.new_write_context();
        let label = context.label().to_owned();
        debug!(transaction = %id, queue = %label, "dispatching transaction");

        let stack = self.clone();
        transaction::spawn(id, label, move || {
            let hierarchy = stack.hierarchy()?;
            transaction::run_bound(hierarchy, id, context, op)
        })
    }

    /// Runs `op` in a new transaction and waits for it and its implicit
    /// commit to finish.
    ///
    /// # Errors
    ///
    /// Fails on the main thread without running `op`. Otherwise returns the
    /// body's error or the implicit commit's error.
    pub fn transact_and_wait<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        transaction::transact_and_wait(self.hierarchy()?, op)
    }

    /// Saves the calling thread's transaction through to the store.
    ///
    /// Returns `None` when nothing reached the store.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction, or with the store error.
    pub fn commit(&self) -> CoreResult<Option<SaveReceipt>> {
        transaction::commit_attached(self.hierarchy()?)
    }

    /// Skips the implicit commit of the calling thread's transaction.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction.
    pub fn cancel_implicit_commit(&self) -> CoreResult<()> {
        transaction::cancel_implicit_commit(self.hierarchy()?)
    }

    /// Returns the calling thread's write context.
    ///
    /// # Errors
    ///
    /// Fails outside a transaction.
    pub fn current_transaction_context(&self) -> CoreResult<Arc<Context>> {
        guards::current_transaction_context(self.hierarchy()?)
    }

    // ---- object lifecycle ----

    /// Creates an object.
    ///
    /// Transient objects can be created on any thread and have no context
    /// and no identity until inserted.
    ///
    /// # Errors
    ///
    /// A non-transient create fails on the main thread and outside a
    /// transaction.
    pub fn create(&self, entity: &str, transient: bool) -> CoreResult<ManagedObject> {
        guards::create(self.hierarchy()?, entity, transient)
    }

    /// Inserts a transient object into the calling thread's write context.
    ///
    /// # Errors
    ///
    /// Fails on the main thread, outside a transaction, and for objects owned
    /// by another context.
    pub fn insert(&self, object: &ManagedObject) -> CoreResult<()> {
        guards::insert(self.hierarchy()?, object)
    }

    /// Deletes an object from the calling thread's write context.
    ///
    /// # Errors
    ///
    /// Fails on the main thread, outside a transaction, and for objects
    /// without a context or owned by another context.
    pub fn delete(&self, object: &ManagedObject) -> CoreResult<()> {
        guards::delete(self.hierarchy()?, object)
    }

    /// Resolves an object from another context in the calling thread's
    /// context: the write context in a transaction, the read context on the
    /// main thread.
    ///
    /// Returns `Ok(None)` if the backing record no longer exists.
    ///
    /// # Errors
    ///
    /// Fails when no context is bound, for transient objects, and when the
    /// source context has unsaved changes.
    pub fn use_in_current_context(&self, object: &ManagedObject) -> CoreResult<Option<ManagedObject>> {
        guards::use_in_current_context(self.hierarchy()?, object)
    }

    // ---- read side ----

    /// Returns the read context.
    ///
    /// # Errors
    ///
    /// Fails off the main thread.
    pub fn read_context(&self) -> CoreResult<ReadContext<'_>> {
        ReadContext::new(self.hierarchy()?)
    }

    /// Registers a callback for changes a merge makes to a read-context
    /// object. Callbacks run on the main thread.
    ///
    /// # Errors
    ///
    /// Fails off the main thread and for objects outside the read context.
    pub fn register_update_handler(
        &self,
        object: &ManagedObject,
        callback: impl Fn(&ManagedObject, ChangeKind) + Send + Sync + 'static,
    ) -> CoreResult<HandlerId> {
        guards::register_update_handler(self.hierarchy()?, object, callback)
    }

    /// Removes an update callback. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub fn unregister_update_handler(&self, handler: HandlerId) -> CoreResult<bool> {
        Ok(self.hierarchy()?.handlers.unregister(handler))
    }

    /// Merges every save event queued so far into the read context.
    ///
    /// Returns the number of saves merged.
    ///
    /// # Errors
    ///
    /// Fails off the main thread.
    pub fn process_pending_changes(&self) -> CoreResult<usize> {
        Ok(self.merge_pending_changes()?.len())
    }

    /// Merges every save event queued so far into the read context and
    /// returns what each merge did, in save order.
    ///
    /// Merging stops at the first failure. The failed event and everything
    /// after it stay queued, so a later call resumes where this one stopped.
    ///
    /// # Errors
    ///
    /// Fails off the main thread, or with the first merge error.
    pub fn merge_pending_changes(&self) -> CoreResult<Vec<MergeReport>> {
        let hierarchy = self.hierarchy()?;
        hierarchy.require_main("merge_pending_changes")?;
        let queued = hierarchy.pending_saves.lock().collect();
        let mut reports = Vec::with_capacity(queued);
        for _ in 0..queued {
            // Handlers run unlocked and may merge reentrantly.
            let Some(event) = hierarchy.pending_saves.lock().pop() else {
                break;
            };
            match propagation::propagate(hierarchy, &event) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    warn!(sequence = event.sequence, error = %err, "merge failed, keeping save queued");
                    hierarchy.pending_saves.lock().restore(event);
                    return Err(err);
                }
            }
        }
        Ok(reports)
    }

    /// Waits up to `timeout` for a save event, then merges everything queued.
    ///
    /// Returns the number of saves merged, 0 on timeout.
    ///
    /// # Errors
    ///
    /// Fails off the main thread, or with the first merge error.
    pub fn wait_for_changes(&self, timeout: Duration) -> CoreResult<usize> {
        let hierarchy = self.hierarchy()?;
        hierarchy.require_main("wait_for_changes")?;
        if !hierarchy.pending_saves.lock().wait(timeout) {
            return Ok(0);
        }
        self.process_pending_changes()
    }

    // ---- save feed ----

    /// Subscribes to master save events.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub fn subscribe(&self) -> CoreResult<Receiver<SaveEvent>> {
        Ok(self.hierarchy()?.feed.subscribe())
    }

    /// Returns retained save events after `cursor`, up to `limit`.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub fn poll_saves(&self, cursor: u64, limit: usize) -> CoreResult<Vec<SaveEvent>> {
        Ok(self.hierarchy()?.feed.poll(cursor, limit))
    }

    /// Returns the sequence of the latest master save, or 0.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub fn latest_sequence(&self) -> CoreResult<u64> {
        Ok(self.hierarchy()?.feed.latest_sequence())
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("config", &self.inner.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
