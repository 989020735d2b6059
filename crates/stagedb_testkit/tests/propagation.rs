//! Integration tests for change propagation into the read context.

use parking_lot::Mutex;
use stagedb_core::{ChangeKind, Violation};
use stagedb_store::{ObjectId, Value};
use stagedb_testkit::{scenarios, TestStack};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(ObjectId, ChangeKind)>>>;

fn watch(stack: &TestStack, id: ObjectId) -> Seen {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let read = stack.read_context().unwrap();
    let object = read.fetch(id).unwrap().unwrap();
    stack
        .register_update_handler(&object, move |object, kind| {
            sink.lock().push((object.id().unwrap(), kind));
        })
        .unwrap();
    seen
}

#[test]
fn uncommitted_objects_are_invisible_to_the_read_context() {
    let stack = TestStack::new();
    let (created_tx, created_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    let handle = stack
        .transact(move |tx| {
            let employee = tx.create("Employee")?;
            employee.set("name", "pending")?;
            created_tx.send(employee.id().unwrap()).unwrap();
            resume_rx.recv().unwrap();
            Ok(())
        })
        .unwrap();

    let id = created_rx.recv().unwrap();
    {
        let read = stack.read_context().unwrap();
        assert!(read.fetch(id).unwrap().is_none());
        assert!(!read.contains(id));
    }

    resume_tx.send(()).unwrap();
    handle.join().unwrap();

    // Committed, but not merged yet.
    assert!(!stack.read_context().unwrap().contains(id));

    assert_eq!(stack.settle(), 1);
    assert!(stack.read_context().unwrap().contains(id));
    assert_eq!(stack.read_value(id, "name"), Some(Value::from("pending")));
}

#[test]
fn concurrent_transactions_each_appear_once() {
    let stack = TestStack::new();

    let first = stack.transact(|tx| {
        let a = tx.create("Employee")?;
        a.set("name", "A")?;
        Ok(a.id().unwrap())
    });
    let second = stack.transact(|tx| {
        let b = tx.create("Employee")?;
        b.set("name", "B")?;
        Ok(b.id().unwrap())
    });
    let a = first.unwrap().join().unwrap();
    let b = second.unwrap().join().unwrap();

    assert_eq!(stack.settle(), 2);

    let read = stack.read_context().unwrap();
    let all = read.fetch_all("Employee").unwrap();
    let ids: Vec<ObjectId> = all.iter().filter_map(|o| o.id()).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids.iter().filter(|&&id| id == a).count(), 1);
    assert_eq!(ids.iter().filter(|&&id| id == b).count(), 1);
    assert_eq!(read.registered_count(), 2);
}

#[test]
fn handlers_see_updates_and_deletes_in_order() {
    let (stack, ids) = scenarios::populated_stack(2);
    let target = ids[0];
    let seen = watch(&stack, target);

    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 99))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(stack.settle(), 1);
    stack
        .transact(move |tx| {
            let object = tx.fetch(target)?.unwrap();
            tx.delete(&object)
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(stack.settle(), 1);

    assert_eq!(
        *seen.lock(),
        vec![(target, ChangeKind::Updated), (target, ChangeKind::Deleted)]
    );
    assert!(!stack.read_context().unwrap().contains(target));
}

#[test]
fn update_then_delete_before_merging_reports_only_the_delete() {
    let (stack, ids) = scenarios::populated_stack(1);
    let target = ids[0];
    let seen = watch(&stack, target);

    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 99))
        .unwrap()
        .join()
        .unwrap();
    stack
        .transact(move |tx| {
            let object = tx.fetch(target)?.unwrap();
            tx.delete(&object)
        })
        .unwrap()
        .join()
        .unwrap();

    let reports = stack.merge_pending_changes().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].is_empty());
    assert_eq!(reports[1].deleted, vec![target]);
    assert_eq!(*seen.lock(), vec![(target, ChangeKind::Deleted)]);
}

#[test]
fn unchanged_values_are_reported_as_refreshed() {
    let (stack, ids) = scenarios::populated_stack(1);
    let target = ids[0];
    let seen = watch(&stack, target);

    // Writing the stored value back changes nothing.
    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 0))
        .unwrap()
        .join()
        .unwrap();

    let reports = stack.merge_pending_changes().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].refreshed, vec![target]);
    assert_eq!(*seen.lock(), vec![(target, ChangeKind::Refreshed)]);
}

#[test]
fn handlers_only_fire_for_their_object() {
    let (stack, ids) = scenarios::populated_stack(2);
    let (watched, other) = (ids[0], ids[1]);
    let seen = watch(&stack, watched);

    stack
        .transact(move |tx| tx.fetch(other)?.unwrap().set("name", "renamed"))
        .unwrap()
        .join()
        .unwrap();
    stack.settle();

    assert!(seen.lock().is_empty());
}

#[test]
fn unregistered_handlers_stop_firing() {
    let (stack, ids) = scenarios::populated_stack(1);
    let target = ids[0];
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);

    let object = stack.read_context().unwrap().fetch(target).unwrap().unwrap();
    let handler = stack
        .register_update_handler(&object, move |_, _| *counter.lock() += 1)
        .unwrap();
    assert!(stack.unregister_update_handler(handler).unwrap());
    assert!(!stack.unregister_update_handler(handler).unwrap());

    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 5))
        .unwrap()
        .join()
        .unwrap();
    stack.settle();

    assert_eq!(*calls.lock(), 0);
    assert_eq!(stack.stats().callbacks, 0);
}

#[test]
fn read_objects_are_immutable_to_callers() {
    let (stack, ids) = scenarios::populated_stack(1);
    let object = stack.read_context().unwrap().fetch(ids[0]).unwrap().unwrap();

    let err = object.set("salary", 1).unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::ReadOnlyObject { .. })));
}

#[test]
fn read_objects_are_confined_to_main() {
    let (stack, ids) = scenarios::populated_stack(1);
    let object = stack.read_context().unwrap().fetch(ids[0]).unwrap().unwrap();
    let worker = stack.stack.clone();

    thread::spawn(move || {
        let err = object.get("salary").unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NotMainThread { .. })));
        assert!(worker.read_context().is_err());
        assert!(worker.process_pending_changes().is_err());
    })
    .join()
    .unwrap();
}

#[test]
fn handlers_must_be_registered_on_main_for_read_objects() {
    let stack = TestStack::new();
    let worker = stack.stack.clone();

    let transient = stack.create("Employee", true).unwrap();
    let err = stack.register_update_handler(&transient, |_, _| {}).unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::TransientObject { .. })));

    thread::spawn(move || {
        let transient = worker.create("Employee", true).unwrap();
        let err = worker.register_update_handler(&transient, |_, _| {}).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NotMainThread { .. })));
    })
    .join()
    .unwrap();
}

#[test]
fn wait_for_changes_times_out_quietly() {
    let stack = TestStack::new();
    assert_eq!(stack.settle_within(Duration::from_millis(10)), 0);

    stack.insert_employee("Ada", 1);
    stack.insert_employee("Grace", 2);
    assert_eq!(stack.settle_within(Duration::from_secs(5)), 2);
}

#[test]
fn feed_subscribers_see_every_save() {
    let stack = TestStack::new();
    let events = stack.subscribe().unwrap();

    let a = stack.insert_employee("Ada", 1);
    let b = stack.insert_employee("Grace", 2);

    let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.inserted, vec![a]);
    assert_eq!(second.inserted, vec![b]);
    assert!(first.sequence < second.sequence);

    let polled = stack.poll_saves(first.sequence, 10).unwrap();
    assert_eq!(polled, vec![second.clone()]);
    assert_eq!(stack.latest_sequence().unwrap(), second.sequence);

    let json = serde_json::to_value(&second).unwrap();
    assert_eq!(json["sequence"], second.sequence);
}

#[test]
fn faults_are_filled_before_their_handlers_run() {
    let (stack, ids) = scenarios::populated_stack(1);
    let target = ids[0];
    let fault = stack.read_context().unwrap().fetch_all("Employee").unwrap().remove(0);
    assert!(fault.is_fault());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    stack
        .register_update_handler(&fault, move |object, _| {
            let was_fault = object.is_fault();
            sink.lock().push((was_fault, object.get("salary").unwrap()));
        })
        .unwrap();

    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 4242))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(stack.settle(), 1);

    assert_eq!(*seen.lock(), vec![(false, Value::Integer(4242))]);
}

#[test]
fn updated_objects_are_loaded_into_the_read_context() {
    let (stack, ids) = scenarios::populated_stack(2);
    let (untouched, target) = (ids[0], ids[1]);
    assert!(!stack.read_context().unwrap().contains(target));

    stack
        .transact(move |tx| tx.fetch(target)?.unwrap().set("salary", 5))
        .unwrap()
        .join()
        .unwrap();
    let reports = stack.merge_pending_changes().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].len(), 1);

    let read = stack.read_context().unwrap();
    assert!(read.contains(target));
    assert!(!read.contains(untouched));
    let object = read.fetch(target).unwrap().unwrap();
    assert!(!object.is_fault());
    assert_eq!(object.get("salary").unwrap(), Value::Integer(5));
}

#[test]
fn main_thread_transplant_leaves_read_objects_to_merges() {
    let (stack, ids) = scenarios::populated_stack(2);
    let target = ids[1];
    let read_side = stack.read_context().unwrap().fetch(target).unwrap().unwrap();
    let seen = watch(&stack, target);

    let written = stack
        .transact(move |tx| {
            let object = tx.fetch(target)?.unwrap();
            object.set("salary", 7)?;
            tx.commit()?;
            Ok(object)
        })
        .unwrap()
        .join()
        .unwrap();

    let resolved = stack.use_in_current_context(&written).unwrap().unwrap();
    assert!(resolved.same_object(&read_side));
    assert_eq!(resolved.get("salary").unwrap(), Value::Integer(1000));
    assert!(seen.lock().is_empty());

    assert_eq!(stack.settle(), 1);
    assert_eq!(read_side.get("salary").unwrap(), Value::Integer(7));
    assert_eq!(*seen.lock(), vec![(target, ChangeKind::Updated)]);
}
