//! Test fixtures and stack helpers.
//!
//! Provides an employee model, initialized stacks over an in-memory store,
//! and common test scenarios.

use stagedb_core::{Config, Stack};
use stagedb_store::{EntityDescription, InMemoryStore, Model, ObjectId, ObjectStore, Record, Value};
use std::sync::Arc;
use std::time::Duration;

/// The model used throughout the tests: employees and departments.
pub fn employee_model() -> Model {
    Model::new()
        .with_entity(
            EntityDescription::new("Employee")
                .attribute("name", Value::Null)
                .attribute("salary", 0)
                .attribute("department", Value::Null),
        )
        .with_entity(EntityDescription::new("Department").attribute("name", Value::Null))
}

/// An initialized stack over an in-memory store.
///
/// The thread that builds it is the stack's main thread.
pub struct TestStack {
    /// The stack.
    pub stack: Stack,
    /// The store underneath, for save counts and failure injection.
    pub store: Arc<InMemoryStore>,
}

impl TestStack {
    /// Creates a stack over an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a stack over an empty store.
    pub fn with_config(config: Config) -> Self {
        Self::build(InMemoryStore::new(employee_model()), config)
    }

    /// Creates a stack over a store already holding `records`.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self::build(
            InMemoryStore::with_records(employee_model(), records),
            Config::default(),
        )
    }

    fn build(store: InMemoryStore, config: Config) -> Self {
        let store = Arc::new(store);
        let stack = Stack::with_config(Arc::clone(&store) as Arc<dyn ObjectStore>, config);
        stack.initialize().expect("Failed to initialize stack");
        Self { stack, store }
    }

    /// Inserts an employee in its own transaction and returns its identity.
    ///
    /// The save has reached the store when this returns; it has not been
    /// merged into the read context yet.
    pub fn insert_employee(&self, name: &str, salary: i64) -> ObjectId {
        let name = name.to_owned();
        self.stack
            .transact(move |tx| {
                let employee = tx.create("Employee")?;
                employee.set("name", name)?;
                employee.set("salary", salary)?;
                Ok(employee.id())
            })
            .expect("Failed to start transaction")
            .join()
            .expect("Transaction failed")
            .expect("Committed object has an identity")
    }

    /// Merges every queued save into the read context.
    pub fn settle(&self) -> usize {
        self.stack
            .process_pending_changes()
            .expect("Failed to merge pending changes")
    }

    /// Waits for at least one save, then merges everything queued.
    pub fn settle_within(&self, timeout: Duration) -> usize {
        self.stack
            .wait_for_changes(timeout)
            .expect("Failed to wait for changes")
    }

    /// Reads an attribute of an object through the read context.
    pub fn read_value(&self, id: ObjectId, key: &str) -> Option<Value> {
        let read = self.stack.read_context().expect("Not on the main thread");
        read.fetch(id)
            .expect("Failed to fetch object")
            .map(|object| object.get(key).expect("Failed to read attribute"))
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStack {
    type Target = Stack;

    fn deref(&self) -> &Self::Target {
        &self.stack
    }
}

/// Runs a test with a fresh stack whose main thread is the calling thread.
///
/// # Example
///
/// ```rust,ignore
/// use stagedb_testkit::with_test_stack;
///
/// #[test]
/// fn my_test() {
///     with_test_stack(|stack| {
///         let id = stack.insert_employee("Ada", 10_000);
///         stack.settle();
///     });
/// }
/// ```
pub fn with_test_stack<F, R>(f: F) -> R
where
    F: FnOnce(&TestStack) -> R,
{
    let stack = TestStack::new();
    f(&stack)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a stack whose store already holds `count` employees.
    ///
    /// The employees are named `employee-N` and earn `N * 1000`.
    pub fn populated_stack(count: usize) -> (TestStack, Vec<ObjectId>) {
        let records: Vec<Record> = (0..count)
            .map(|i| {
                Record::new(ObjectId::new(), "Employee")
                    .with("name", format!("employee-{i}"))
                    .with("salary", i as i64 * 1000)
                    .with("department", Value::Null)
            })
            .collect();
        let mut ids: Vec<ObjectId> = records.iter().map(|r| r.id).collect();
        ids.sort();
        (TestStack::with_records(records), ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_is_initialized_on_this_thread() {
        let stack = TestStack::new();
        assert!(stack.is_initialized());
        assert!(stack.is_main_thread());
    }

    #[test]
    fn test_insert_and_settle() {
        with_test_stack(|stack| {
            let id = stack.insert_employee("Ada", 10_000);
            assert_eq!(stack.settle(), 1);
            assert_eq!(stack.read_value(id, "salary"), Some(Value::Integer(10_000)));
        });
    }

    #[test]
    fn test_populated_scenario() {
        let (stack, ids) = scenarios::populated_stack(5);
        assert_eq!(ids.len(), 5);
        assert_eq!(stack.store.record_count(), 5);
        let all = stack.read_context().unwrap().fetch_all("Employee").unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|o| o.is_fault()));
    }
}
