//! Stress harnesses for StageDB.
//!
//! These run many transactions concurrently and report what reached the
//! store, so tests can check that nothing was lost or duplicated.

use serde::Serialize;
use stagedb_core::{CoreResult, Stack};
use stagedb_store::ObjectId;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressResult {
    /// Transactions attempted.
    pub total: usize,
    /// Transactions that committed.
    pub successful: usize,
    /// Transactions that failed.
    pub failed: usize,
    /// Identities of every committed object.
    pub inserted: Vec<ObjectId>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Transactions per second.
    pub transactions_per_second: f64,
}

impl StressResult {
    /// Creates a new result.
    pub fn new(inserted: Vec<ObjectId>, successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let transactions_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total,
            successful,
            failed,
            inserted,
            duration,
            transactions_per_second,
        }
    }

    /// Renders the result as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.total);
        println!("Committed: {}", self.successful);
        println!("Failed: {}", self.failed);
        println!("Objects inserted: {}", self.inserted.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.transactions_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions run by each thread.
    pub transactions_per_thread: usize,
    /// Objects created by each transaction.
    pub objects_per_transaction: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 25,
            objects_per_transaction: 2,
        }
    }
}

fn insert_batch(stack: &Stack, thread: usize, batch: usize, count: usize) -> CoreResult<Vec<ObjectId>> {
    stack.transact_and_wait(|tx| {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let employee = tx.create("Employee")?;
            employee.set("name", format!("t{thread}-b{batch}-{i}"))?;
            employee.set("salary", (thread * 1000 + batch) as i64)?;
            ids.extend(employee.id());
        }
        Ok(ids)
    })
}

/// Runs `transact_and_wait` insert transactions from worker threads.
///
/// Must not be called from a thread that needs to stay responsive: it
/// blocks until every worker finished.
pub fn run_concurrent_inserts(stack: &Stack, config: &StressConfig) -> StressResult {
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let stack = stack.clone();
            let config = config.clone();
            thread::spawn(move || {
                let mut inserted = Vec::new();
                let mut failed = 0usize;
                for batch in 0..config.transactions_per_thread {
                    match insert_batch(&stack, t, batch, config.objects_per_transaction) {
                        Ok(ids) => inserted.extend(ids),
                        Err(_) => failed += 1,
                    }
                }
                (inserted, failed)
            })
        })
        .collect();

    let mut inserted = Vec::new();
    let mut failed = 0usize;
    for handle in handles {
        let (ids, errors) = handle.join().expect("Worker thread panicked");
        inserted.extend(ids);
        failed += errors;
    }

    let attempted = config.threads * config.transactions_per_thread;
    StressResult::new(inserted, attempted - failed, failed, start.elapsed())
}

/// Dispatches every insert transaction with `transact` and joins them all.
///
/// Safe to call from the main thread; merging is left to the caller.
pub fn run_async_inserts(stack: &Stack, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    let count = config.objects_per_transaction;
    let attempted = config.threads * config.transactions_per_thread;

    let handles: Vec<_> = (0..attempted)
        .map(|n| {
            stack.transact(move |tx| {
                let mut ids = Vec::with_capacity(count);
                for i in 0..count {
                    let employee = tx.create("Employee")?;
                    employee.set("name", format!("async-{n}-{i}"))?;
                    ids.extend(employee.id());
                }
                Ok(ids)
            })
        })
        .collect();

    let mut inserted = Vec::new();
    let mut failed = 0usize;
    for handle in handles {
        match handle.and_then(|h| h.join()) {
            Ok(ids) => inserted.extend(ids),
            Err(_) => failed += 1,
        }
    }

    StressResult::new(inserted, attempted - failed, failed, start.elapsed())
}

/// Runs concurrent single-property edits against one shared object.
///
/// Each worker rewrites its own attribute; returns the values each worker
/// wrote last, in worker order.
pub fn run_disjoint_edits(stack: &Stack, id: ObjectId, attributes: &[&'static str]) -> Vec<i64> {
    let handles: Vec<_> = attributes
        .iter()
        .enumerate()
        .map(|(n, &attribute)| {
            let stack = stack.clone();
            thread::spawn(move || {
                let value = (n as i64 + 1) * 111;
                stack
                    .transact_and_wait(|tx| {
                        let object = tx.fetch(id)?.expect("Object exists");
                        object.set(attribute, value)
                    })
                    .expect("Edit failed");
                value
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("Worker thread panicked"))
        .collect()
}
