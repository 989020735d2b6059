//! Demo command implementation.

use parking_lot::Mutex;
use serde::Serialize;
use stagedb_core::{ChangeKind, Stack, StatsSnapshot};
use stagedb_store::{InMemoryStore, ObjectId, ObjectStore, StoreError, Value};
use stagedb_testkit::employee_model;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Demo result.
#[derive(Debug, Serialize)]
pub struct DemoResult {
    /// Salary read on the main thread after the first commit.
    pub initial_salary: Option<i64>,
    /// Salary read on the main thread after the raise.
    pub final_salary: Option<i64>,
    /// Change callbacks observed on the main thread.
    pub callbacks: Vec<String>,
    /// Store saves performed.
    pub store_saves: u64,
    /// Stack statistics.
    pub stats: StatsSnapshot,
}

fn salary(stack: &Stack, id: ObjectId) -> Result<Option<i64>, Box<dyn std::error::Error>> {
    let read = stack.read_context()?;
    let Some(object) = read.fetch(id)? else {
        return Ok(None);
    };
    match object.get("salary")? {
        Value::Integer(salary) => Ok(Some(salary)),
        _ => Ok(None),
    }
}

/// Runs the demo command.
pub fn run(initial: i64, raise: i64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new(employee_model()));
    let stack = Stack::new(Arc::clone(&store) as Arc<dyn ObjectStore>);
    stack.initialize()?;

    let id = stack
        .transact(move |tx| {
            let employee = tx.create("Employee")?;
            employee.set("name", "A")?;
            employee.set("salary", initial)?;
            tx.commit()?;
            Ok(employee.id())
        })?
        .join()?
        .ok_or("Committed employee has no identity")?;
    stack.wait_for_changes(Duration::from_secs(5))?;
    let initial_salary = salary(&stack, id)?;
    info!(employee = %id, salary = ?initial_salary, "employee committed");

    let callbacks = Arc::new(Mutex::new(Vec::new()));
    let read_side = stack.read_context()?.fetch(id)?.ok_or("Employee vanished")?;
    let sink = Arc::clone(&callbacks);
    stack.register_update_handler(&read_side, move |object, kind: ChangeKind| {
        sink.lock().push(format!("{}: {:?}", object.entity(), kind));
    })?;

    stack
        .transact(move |tx| {
            let employee = tx
                .use_in_current_context(&read_side)?
                .ok_or(StoreError::ObjectNotFound { id })?;
            employee.set("salary", raise)?;
            tx.commit().map(drop)
        })?
        .join()?;
    stack.wait_for_changes(Duration::from_secs(5))?;
    let final_salary = salary(&stack, id)?;
    info!(employee = %id, salary = ?final_salary, "raise merged");

    let callbacks = callbacks.lock().clone();
    let result = DemoResult {
        initial_salary,
        final_salary,
        callbacks,
        store_saves: store.save_count(),
        stats: stack.stats(),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text(&result);
    }

    Ok(())
}

fn print_text(result: &DemoResult) {
    println!("StageDB Demo");
    println!("============");
    println!();
    println!("Initial salary: {:?}", result.initial_salary);
    println!("Final salary:   {:?}", result.final_salary);
    println!("Store saves:    {}", result.store_saves);
    println!();
    println!("Callbacks:");
    for callback in &result.callbacks {
        println!("  {}", callback);
    }
    println!();
    println!("Transactions committed: {}", result.stats.transactions_committed);
    println!("Merges applied:         {}", result.stats.merges);
}
