//! The initialize-once registry owning master and the read context.

use super::{Context, MasterContext};
use crate::binding::{Current, ThreadBindings};
use crate::config::Config;
use crate::error::{CoreResult, Violation};
use crate::feed::{SaveEvent, SaveFeed};
use crate::propagation::UpdateHandlers;
use crate::stats::StackStats;
use crate::types::{ContextId, ContextKind, TransactionId};
use parking_lot::Mutex;
use stagedb_store::ObjectStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// Save events waiting to be merged into the read context, oldest first.
///
/// Events leave the feed channel into a backlog; an event whose merge failed
/// goes back to the front so a later merge retries it before anything newer.
#[derive(Debug)]
pub(crate) struct PendingSaves {
    receiver: Receiver<SaveEvent>,
    backlog: VecDeque<SaveEvent>,
}

impl PendingSaves {
    fn new(receiver: Receiver<SaveEvent>) -> Self {
        Self {
            receiver,
            backlog: VecDeque::new(),
        }
    }

    /// Moves everything delivered so far into the backlog and returns its
    /// length.
    pub(crate) fn collect(&mut self) -> usize {
        self.backlog.extend(self.receiver.try_iter());
        self.backlog.len()
    }

    /// Waits up to `timeout` for an event unless one is already backlogged.
    pub(crate) fn wait(&mut self, timeout: Duration) -> bool {
        if !self.backlog.is_empty() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.backlog.push_back(event);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn pop(&mut self) -> Option<SaveEvent> {
        self.backlog.pop_front()
    }

    /// Puts back an event that could not be merged.
    pub(crate) fn restore(&mut self, event: SaveEvent) {
        self.backlog.push_front(event);
    }
}

/// Everything an initialized stack owns.
pub(crate) struct Hierarchy {
    pub(crate) config: Config,
    pub(crate) bindings: Arc<ThreadBindings>,
    pub(crate) master: Arc<MasterContext>,
    pub(crate) read: Arc<Context>,
    pub(crate) feed: Arc<SaveFeed>,
    pub(crate) handlers: UpdateHandlers,
    pub(crate) stats: Arc<StackStats>,
    pub(crate) pending_saves: Mutex<PendingSaves>,
    next_context: AtomicU64,
    next_transaction: AtomicU64,
}

impl Hierarchy {
    /// Builds master and the read context; the calling thread becomes main.
    pub(crate) fn new(store: Arc<dyn ObjectStore>, config: Config, stats: Arc<StackStats>) -> Self {
        let bindings = Arc::new(ThreadBindings::new(thread::current().id()));
        let feed = Arc::new(SaveFeed::with_max_history(config.feed_history));
        let pending_saves = Mutex::new(PendingSaves::new(feed.subscribe()));
        let master = Arc::new(MasterContext::new(
            store,
            config.merge_policy,
            Arc::clone(&feed),
            Arc::clone(&stats),
        ));
        let read = Context::new(
            ContextId::READ,
            ContextKind::Read,
            Arc::clone(&master),
            Arc::clone(&bindings),
            format!("{}.read", config.queue_label_prefix),
        );
        Self {
            config,
            bindings,
            master,
            read,
            feed,
            handlers: UpdateHandlers::new(),
            stats,
            pending_saves,
            next_context: AtomicU64::new(ContextId::READ.as_u64() + 1),
            next_transaction: AtomicU64::new(1),
        }
    }

    /// Creates a fresh write context. Contexts are never reused.
    pub(crate) fn new_write_context(&self) -> Arc<Context> {
        let id = ContextId::new(self.next_context.fetch_add(1, Ordering::Relaxed));
        Context::new(
            id,
            ContextKind::Write,
            Arc::clone(&self.master),
            Arc::clone(&self.bindings),
            format!("{}.{}", self.config.queue_label_prefix, id),
        )
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.next_transaction.fetch_add(1, Ordering::Relaxed))
    }

    /// The context the calling thread works in, if any.
    pub(crate) fn current(&self) -> Option<Arc<Context>> {
        match self.bindings.current() {
            Current::Main => Some(Arc::clone(&self.read)),
            Current::Attached(context) => Some(context),
            Current::Unbound => None,
        }
    }

    pub(crate) fn require_main(&self, operation: &'static str) -> CoreResult<()> {
        if self.bindings.is_main_thread() {
            Ok(())
        } else {
            Err(Violation::NotMainThread { operation }.into())
        }
    }
}

impl std::fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hierarchy")
            .field("bindings", &self.bindings)
            .field("master", &self.master)
            .field("read", &self.read)
            .finish_non_exhaustive()
    }
}

/// Holds the hierarchy once the stack has been initialized.
#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    cell: OnceLock<Hierarchy>,
}

impl ContextRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs the hierarchy built by `build`.
    ///
    /// # Errors
    ///
    /// Fails if a hierarchy is already installed.
    pub(crate) fn initialize(&self, build: impl FnOnce() -> Hierarchy) -> CoreResult<&Hierarchy> {
        if self.cell.get().is_some() {
            return Err(Violation::AlreadyInitialized.into());
        }
        let mut built = false;
        let hierarchy = self.cell.get_or_init(|| {
            built = true;
            build()
        });
        if built {
            Ok(hierarchy)
        } else {
            Err(Violation::AlreadyInitialized.into())
        }
    }

    /// Returns the installed hierarchy.
    ///
    /// # Errors
    ///
    /// Fails before initialization.
    pub(crate) fn get(&self) -> CoreResult<&Hierarchy> {
        self.cell.get().ok_or_else(|| Violation::NotInitialized.into())
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
