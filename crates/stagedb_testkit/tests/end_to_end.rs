//! End-to-end scenarios across transactions, commits and propagation.

use proptest::prelude::*;
use stagedb_core::{Config, MergePolicy};
use stagedb_store::{ObjectStore, Value};
use stagedb_testkit::prelude::*;
use std::thread;

#[test]
fn salary_round_trip() {
    let stack = TestStack::new();

    // T1 creates A and commits.
    let a = stack
        .transact(|tx| {
            let a = tx.create("Employee")?;
            a.set("name", "A")?;
            a.set("salary", 10_000)?;
            tx.commit()?;
            Ok(a.id().unwrap())
        })
        .unwrap()
        .join()
        .unwrap();
    stack.settle();
    assert_eq!(stack.read_value(a, "salary"), Some(Value::Integer(10_000)));

    // T2 transplants the read-side object and raises the salary.
    let read_side = stack.read_context().unwrap().fetch(a).unwrap().unwrap();
    stack
        .transact(move |tx| {
            let a = tx.use_in_current_context(&read_side)?.unwrap();
            a.set("salary", 20_000)?;
            tx.commit().map(drop)
        })
        .unwrap()
        .join()
        .unwrap();
    stack.settle();

    assert_eq!(stack.read_value(a, "salary"), Some(Value::Integer(20_000)));
    assert_eq!(stack.store.save_count(), 2);
}

#[test]
fn main_thread_transplant_into_read_context() {
    let stack = TestStack::new();

    let written = stack
        .transact(|tx| {
            let object = tx.create("Employee")?;
            object.set("name", "Ada")?;
            tx.commit()?;
            Ok(object)
        })
        .unwrap()
        .join()
        .unwrap();

    let read_side = stack.use_in_current_context(&written).unwrap().unwrap();
    assert_eq!(read_side.context_id(), Some(stagedb_core::ContextId::READ));
    assert_eq!(read_side.get("name").unwrap(), Value::from("Ada"));
}

#[test]
fn disjoint_edits_all_survive_property_trumps() {
    let (stack, ids) = scenarios::populated_stack(1);
    let id = ids[0];
    let worker = stack.stack.clone();

    let written = thread::spawn(move || run_disjoint_edits(&worker, id, &["salary", "department"]))
        .join()
        .unwrap();

    let record = stack.store.fetch(id).unwrap().unwrap();
    assert_eq!(record.get("salary"), Some(&Value::Integer(written[0])));
    assert_eq!(record.get("department"), Some(&Value::Integer(written[1])));
    assert_eq!(record.get("name"), Some(&Value::from("employee-0")));
}

#[test]
fn object_trumps_replaces_whole_objects() {
    let stack = TestStack::with_config(Config::default().merge_policy(MergePolicy::ObjectTrumps));
    let id = stack.insert_employee("Ada", 1);

    // Both transactions read the same snapshot before either commits.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
    let salary = stack
        .transact(move |tx| {
            let object = tx.fetch(id)?.unwrap();
            object.properties()?;
            ready_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            object.set("salary", 2)
        })
        .unwrap();
    ready_rx.recv().unwrap();

    stack
        .transact(move |tx| tx.fetch(id)?.unwrap().set("name", "Grace"))
        .unwrap()
        .join()
        .unwrap();
    go_tx.send(()).unwrap();
    salary.join().unwrap();

    // The later save carried the whole object, stale name included.
    let record = stack.store.fetch(id).unwrap().unwrap();
    assert_eq!(record.get("salary"), Some(&Value::Integer(2)));
    assert_eq!(record.get("name"), Some(&Value::from("Ada")));
}

#[test]
fn stress_run_merges_every_object_once() {
    let stack = TestStack::new();
    let worker = stack.stack.clone();
    let config = StressConfig {
        threads: 4,
        transactions_per_thread: 10,
        objects_per_transaction: 3,
    };

    let result = thread::spawn(move || run_concurrent_inserts(&worker, &config))
        .join()
        .unwrap();
    assert_eq!(result.failed, 0);
    assert_eq!(stack.settle(), 40);

    let mut expected = result.inserted.clone();
    expected.sort();
    let read = stack.read_context().unwrap();
    let merged: Vec<_> = read
        .fetch_all("Employee")
        .unwrap()
        .iter()
        .filter_map(|o| o.id())
        .collect();
    assert_eq!(merged, expected);
    assert_eq!(read.registered_count(), 120);

    let stats = stack.stats();
    assert_eq!(stats.transactions_committed, 40);
    assert_eq!(stats.store_saves, 40);
    assert_eq!(stats.merges, 40);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn last_committed_edit_wins(edits in edit_sequence_strategy(6)) {
        let stack = TestStack::new();
        let id = stack.insert_employee("Seed", 0);

        for edit in edits.clone() {
            stack
                .transact(move |tx| tx.fetch(id)?.unwrap().set(edit.attribute(), edit.value()))
                .unwrap()
                .join()
                .unwrap();
        }
        stack.settle();

        for attribute in ["name", "salary"] {
            let expected = edits
                .iter()
                .rev()
                .find(|e| e.attribute() == attribute)
                .map(EmployeeEdit::value);
            if let Some(expected) = expected {
                prop_assert_eq!(stack.read_value(id, attribute), Some(expected));
            }
        }
    }
}
