//! Stack statistics.
//!
//! Counters for the transaction runner, the commit cascade and change
//! propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = stack.stats();
//! println!("Committed: {}", stats.transactions_committed);
//! println!("Store saves: {}", stats.store_saves);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stack statistics.
///
/// All counters are atomic and can be read while transactions are running.
#[derive(Debug, Default)]
pub struct StackStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_cancelled: AtomicU64,
    transactions_failed: AtomicU64,
    explicit_commits: AtomicU64,
    context_saves: AtomicU64,
    store_saves: AtomicU64,
    noop_saves: AtomicU64,
    store_failures: AtomicU64,
    merges: AtomicU64,
    callbacks: AtomicU64,
}

impl StackStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_cancel(&self) {
        self.transactions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_failure(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_explicit_commit(&self) {
        self.explicit_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_context_save(&self) {
        self.context_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_save(&self) {
        self.store_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_noop_save(&self) {
        self.noop_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callbacks(&self, count: u64) {
        self.callbacks.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_cancelled: self.transactions_cancelled.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            explicit_commits: self.explicit_commits.load(Ordering::Relaxed),
            context_saves: self.context_saves.load(Ordering::Relaxed),
            store_saves: self.store_saves.load(Ordering::Relaxed),
            noop_saves: self.noop_saves.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of stack statistics.
///
/// Unlike `StackStats`, this is a plain struct that can be serialized,
/// compared, or passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions whose body started running.
    pub transactions_started: u64,
    /// Transactions closed after a successful implicit commit.
    pub transactions_committed: u64,
    /// Transactions whose implicit commit was cancelled.
    pub transactions_cancelled: u64,
    /// Transactions whose body or implicit commit failed.
    pub transactions_failed: u64,
    /// Explicit `commit()` calls that succeeded.
    pub explicit_commits: u64,
    /// Write-context saves pushed into master.
    pub context_saves: u64,
    /// Master saves that wrote to the store.
    pub store_saves: u64,
    /// Master saves skipped because nothing was pending.
    pub noop_saves: u64,
    /// Store saves that failed.
    pub store_failures: u64,
    /// Change sets merged into the read context.
    pub merges: u64,
    /// Update callbacks dispatched.
    pub callbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StackStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_transactions() {
        let stats = StackStats::new();

        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit();
        stats.record_transaction_cancel();
        stats.record_callbacks(3);

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_cancelled, 1);
        assert_eq!(snap.callbacks, 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StackStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_store_save();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.snapshot().store_saves, 1000);
    }
}
