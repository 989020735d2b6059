//! Running transaction bodies on their write context's queue.

use super::state::{Transaction, TransactionState};
use crate::binding::{Binding, Current, RestoreBinding};
use crate::context::{Context, Hierarchy};
use crate::error::{CoreError, CoreResult, Violation};
use crate::types::TransactionId;
use stagedb_store::SaveReceipt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Runs `op` bound to `context` on the calling thread.
///
/// The context's queue is held for the whole body and implicit commit, the
/// context is attached for the duration, and the thread's previous binding
/// is restored afterwards, including on unwind.
pub(crate) fn run_bound<T>(
    hierarchy: &Hierarchy,
    id: TransactionId,
    context: Arc<Context>,
    op: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
) -> CoreResult<T> {
    let queue_context = Arc::clone(&context);
    queue_context.queue().perform_and_wait(|| {
        let tx = Transaction::new(id, hierarchy, Arc::clone(&context));
        let _restore = RestoreBinding::install(&hierarchy.bindings, Binding::attached(context));
        tx.set_state(TransactionState::Bound);

        hierarchy.stats.record_transaction_start();
        debug!(transaction = %id, context = %tx.context_id(), "transaction started");
        tx.set_state(TransactionState::Running);

        let value = match op(&tx) {
            Ok(value) => value,
            Err(err) => {
                tx.set_state(TransactionState::Closed);
                hierarchy.stats.record_transaction_failure();
                warn!(transaction = %id, error = %err, "transaction body failed, skipping implicit commit");
                return Err(err);
            }
        };

        if hierarchy.bindings.suppress_implicit_commit() {
            tx.set_state(TransactionState::Cancelled);
            hierarchy.stats.record_transaction_cancel();
            debug!(transaction = %id, "implicit commit cancelled");
        } else {
            tx.set_state(TransactionState::ImplicitCommitPending);
            if let Err(err) = tx.context().save() {
                tx.set_state(TransactionState::Closed);
                hierarchy.stats.record_transaction_failure();
                warn!(transaction = %id, error = %err, "implicit commit failed");
                return Err(err);
            }
            tx.set_state(TransactionState::Committed);
            hierarchy.stats.record_transaction_commit();
        }

        tx.set_state(TransactionState::Closed);
        debug!(transaction = %id, "transaction closed");
        Ok(value)
    })
}

/// Runs a transaction synchronously on the calling thread.
pub(crate) fn transact_and_wait<T>(
    hierarchy: &Hierarchy,
    op: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
) -> CoreResult<T> {
    if hierarchy.bindings.is_main_thread() {
        return Err(Violation::MainThread {
            operation: "transact_and_wait",
        }
        .into());
    }
    let id = hierarchy.next_transaction_id();
    run_bound(hierarchy, id, hierarchy.new_write_context(), op)
}

/// Starts `work` on a dedicated queue thread named `label`.
pub(crate) fn spawn<T, W>(id: TransactionId, label: String, work: W) -> CoreResult<TransactionHandle<T>>
where
    T: Send + 'static,
    W: FnOnce() -> CoreResult<T> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(label)
        .spawn(work)
        .map_err(CoreError::Spawn)?;
    Ok(TransactionHandle { id, handle })
}

/// Saves the calling thread's write context through to the store.
pub(crate) fn commit_attached(hierarchy: &Hierarchy) -> CoreResult<Option<SaveReceipt>> {
    let context = attached(hierarchy, "commit")?;
    let receipt = context.save()?;
    hierarchy.stats.record_explicit_commit();
    debug!(
        context = %context.id(),
        sequence = receipt.as_ref().map(|r| r.sequence),
        "explicit commit"
    );
    Ok(receipt)
}

/// Suppresses the implicit commit of the calling thread's transaction.
pub(crate) fn cancel_implicit_commit(hierarchy: &Hierarchy) -> CoreResult<()> {
    let context = attached(hierarchy, "cancel_implicit_commit")?;
    hierarchy.bindings.set_suppress_implicit_commit(true)?;
    debug!(context = %context.id(), "implicit commit suppressed");
    Ok(())
}

fn attached(hierarchy: &Hierarchy, operation: &'static str) -> CoreResult<Arc<Context>> {
    match hierarchy.bindings.current() {
        Current::Attached(context) => Ok(context),
        _ => Err(Violation::NotInTransaction { operation }.into()),
    }
}

/// Handle to an asynchronously running transaction.
#[derive(Debug)]
pub struct TransactionHandle<T> {
    id: TransactionId,
    handle: JoinHandle<CoreResult<T>>,
}

impl<T> TransactionHandle<T> {
    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns `true` once the body and its implicit commit have finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the transaction and returns the body's result.
    ///
    /// Joining from the main thread blocks it; prefer
    /// [`crate::Stack::wait_for_changes`] there.
    ///
    /// # Errors
    ///
    /// Returns the body's error, the implicit commit's error, or
    /// [`CoreError::TransactionPanicked`] if the body panicked.
    pub fn join(self) -> CoreResult<T> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => Err(CoreError::from_panic(payload)),
        }
    }
}
