//! Stress command implementation.

use serde::Serialize;
use stagedb_core::{Stack, StatsSnapshot};
use stagedb_store::{InMemoryStore, ObjectStore};
use stagedb_testkit::{employee_model, run_async_inserts, run_concurrent_inserts, StressConfig, StressResult};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Stress run report.
#[derive(Debug, Serialize)]
pub struct StressReport {
    /// Transaction results.
    pub run: StressSummary,
    /// Objects registered in the read context after merging.
    pub merged_objects: usize,
    /// Saves merged into the read context.
    pub merged_saves: usize,
    /// Time spent merging.
    pub merge_duration: Duration,
    /// Stack statistics.
    pub stats: StatsSnapshot,
}

/// Transaction results without the inserted identities.
#[derive(Debug, Serialize)]
pub struct StressSummary {
    /// Transactions attempted.
    pub total: usize,
    /// Transactions that committed.
    pub successful: usize,
    /// Transactions that failed.
    pub failed: usize,
    /// Objects inserted.
    pub inserted: usize,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Transactions per second.
    pub transactions_per_second: f64,
}

impl From<&StressResult> for StressSummary {
    fn from(result: &StressResult) -> Self {
        Self {
            total: result.total,
            successful: result.successful,
            failed: result.failed,
            inserted: result.inserted.len(),
            duration: result.duration,
            transactions_per_second: result.transactions_per_second,
        }
    }
}

/// Runs the stress command.
pub fn run(
    threads: usize,
    transactions: usize,
    objects: usize,
    dispatch: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new(employee_model()));
    let stack = Stack::new(Arc::clone(&store) as Arc<dyn ObjectStore>);
    stack.initialize()?;

    let config = StressConfig {
        threads,
        transactions_per_thread: transactions,
        objects_per_transaction: objects,
    };
    info!(?config, dispatch, "starting stress run");

    let result = if dispatch {
        run_async_inserts(&stack, &config)
    } else {
        // Workers must not run on the main thread, which only merges.
        let worker = stack.clone();
        let config = config.clone();
        thread::spawn(move || run_concurrent_inserts(&worker, &config))
            .join()
            .map_err(|_| "Stress workers panicked")?
    };
    if result.failed > 0 {
        warn!(failed = result.failed, "some transactions failed");
    }

    let start = Instant::now();
    let merged_saves = stack.process_pending_changes()?;
    let merge_duration = start.elapsed();
    let merged_objects = stack.read_context()?.registered_count();
    info!(merged_saves, merged_objects, records = store.record_count(), "stress run merged");

    let report = StressReport {
        run: StressSummary::from(&result),
        merged_objects,
        merged_saves,
        merge_duration,
        stats: stack.stats(),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        result.print_summary(if dispatch { "Dispatched inserts" } else { "Concurrent inserts" });
        println!("Saves merged: {}", report.merged_saves);
        println!("Objects in read context: {}", report.merged_objects);
        println!("Merge duration: {:?}", report.merge_duration);
    }

    Ok(())
}
