//! Merging master saves into the read context.
//!
//! Every successful master save produces one [`SaveEvent`]. On the main
//! thread each event is applied in three steps:
//!
//! 1. every updated object is faulted into the read context
//! 2. the whole event is merged inside the sanctioned-merge window
//! 3. if any update handlers are registered, each object the merge reported
//!    is handed to its handlers
//!
//! Events are applied in the order the saves completed.

use crate::context::Hierarchy;
use crate::error::{CoreResult, Violation};
use crate::feed::SaveEvent;
use crate::object::ManagedObject;
use crate::types::ContextKind;
use parking_lot::Mutex;
use stagedb_store::ObjectId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// How the read context observed an object change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The object was refreshed but its values did not change.
    Refreshed,
    /// The object's values changed.
    Updated,
    /// The object was deleted.
    Deleted,
}

/// Identifies one registered update handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type UpdateCallback = Arc<dyn Fn(&ManagedObject, ChangeKind) + Send + Sync>;

/// Per-object update callbacks.
///
/// Dispatch is skipped entirely while nothing is registered.
pub(crate) struct UpdateHandlers {
    enabled: AtomicBool,
    next_id: AtomicU64,
    entries: Mutex<HashMap<ObjectId, Vec<(HandlerId, UpdateCallback)>>>,
}

impl UpdateHandlers {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register(
        &self,
        id: ObjectId,
        callback: impl Fn(&ManagedObject, ChangeKind) + Send + Sync + 'static,
    ) -> HandlerId {
        let handler = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock();
        entries
            .entry(id)
            .or_default()
            .push((handler, Arc::new(callback)));
        self.enabled.store(true, Ordering::Release);
        handler
    }

    pub(crate) fn unregister(&self, handler: HandlerId) -> bool {
        let mut entries = self.entries.lock();
        let mut removed = false;
        entries.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(id, _)| *id != handler);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        self.enabled.store(!entries.is_empty(), Ordering::Release);
        removed
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    /// Invokes the handlers of every reported object. Returns the number of
    /// callbacks invoked.
    fn dispatch(&self, changes: &[(ManagedObject, ChangeKind)]) -> u64 {
        let mut invoked = 0;
        for (object, kind) in changes {
            let Some(id) = object.id() else { continue };
            // Callbacks may register or unregister handlers.
            let callbacks: Vec<UpdateCallback> = match self.entries.lock().get(&id) {
                Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => continue,
            };
            for callback in callbacks {
                callback(object, *kind);
                invoked += 1;
            }
            if *kind == ChangeKind::Deleted {
                self.forget(id);
            }
        }
        invoked
    }

    /// Drops every handler of an object that left the read context.
    fn forget(&self, id: ObjectId) {
        let mut entries = self.entries.lock();
        if entries.remove(&id).is_some() {
            trace!(object = %id, "retired handlers of deleted object");
        }
        self.enabled.store(!entries.is_empty(), Ordering::Release);
    }
}

impl std::fmt::Debug for UpdateHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateHandlers")
            .field("enabled", &self.enabled())
            .field("count", &self.count())
            .finish()
    }
}

/// What one merge did to the read context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Sequence of the merged save.
    pub sequence: u64,
    /// Registered objects refreshed without value changes.
    pub refreshed: Vec<ObjectId>,
    /// Registered objects whose values changed.
    pub updated: Vec<ObjectId>,
    /// Registered objects removed from the read context.
    pub deleted: Vec<ObjectId>,
}

impl MergeReport {
    /// Returns the number of reported objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refreshed.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns `true` if the merge touched no registered object.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn note(&mut self, id: ObjectId, kind: ChangeKind) {
        match kind {
            ChangeKind::Refreshed => self.refreshed.push(id),
            ChangeKind::Updated => self.updated.push(id),
            ChangeKind::Deleted => self.deleted.push(id),
        }
    }
}

/// Applies one save event to the read context.
///
/// # Errors
///
/// Fails off the main thread, or if the store cannot be read.
pub(crate) fn propagate(hierarchy: &Hierarchy, event: &SaveEvent) -> CoreResult<MergeReport> {
    hierarchy.require_main("propagate")?;
    let read = &hierarchy.read;
    debug_assert_eq!(read.kind(), ContextKind::Read);

    for &id in &event.updated {
        read.prefault(id)?;
    }

    let changes = hierarchy
        .bindings
        .with_merge_window(|| merge(hierarchy, event))?;
    hierarchy.stats.record_merge();

    let mut report = MergeReport {
        sequence: event.sequence,
        ..MergeReport::default()
    };
    for (object, kind) in &changes {
        if let Some(id) = object.id() {
            report.note(id, *kind);
        }
    }

    if hierarchy.handlers.enabled() {
        let invoked = hierarchy.handlers.dispatch(&changes);
        hierarchy.stats.record_callbacks(invoked);
    }

    debug!(
        sequence = event.sequence,
        refreshed = report.refreshed.len(),
        updated = report.updated.len(),
        deleted = report.deleted.len(),
        "merged save into read context"
    );
    Ok(report)
}

fn merge(hierarchy: &Hierarchy, event: &SaveEvent) -> CoreResult<Vec<(ManagedObject, ChangeKind)>> {
    if !hierarchy.bindings.inside_merge() {
        return Err(Violation::NotMainThread { operation: "merge" }.into());
    }
    let read = &hierarchy.read;
    let master = read.parent();
    let mut changes = Vec::new();

    for &id in &event.inserted {
        match (read.registered(id), master.fetch_record(id)?) {
            (Some(object), Some(record)) => {
                object.overwrite(record.properties)?;
                changes.push((object, ChangeKind::Refreshed));
            }
            (None, Some(record)) => {
                let description = master.entity(&record.entity)?;
                read.register_fault(id, description);
                trace!(object = %id, "registered inserted object");
            }
            (_, None) => {}
        }
    }

    for &id in &event.updated {
        let Some(object) = read.registered(id) else { continue };
        // A missing record was deleted by a later save; that save's event
        // reports it.
        if let Some(record) = master.fetch_record(id)? {
            let kind = if object.overwrite(record.properties)? {
                ChangeKind::Updated
            } else {
                ChangeKind::Refreshed
            };
            changes.push((object, kind));
        }
    }

    for &id in &event.deleted {
        if let Some(object) = read.unregister(id) {
            object.mark_deleted();
            changes.push((object, ChangeKind::Deleted));
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_toggle_dispatch() {
        let handlers = UpdateHandlers::new();
        assert!(!handlers.enabled());

        let id = ObjectId::new();
        let first = handlers.register(id, |_, _| {});
        let second = handlers.register(id, |_, _| {});
        assert!(handlers.enabled());
        assert_eq!(handlers.count(), 2);

        assert!(handlers.unregister(first));
        assert!(handlers.enabled());
        assert!(handlers.unregister(second));
        assert!(!handlers.enabled());
        assert!(!handlers.unregister(second));
    }

    #[test]
    fn forgetting_an_object_drops_its_handlers() {
        let handlers = UpdateHandlers::new();
        let (kept, gone) = (ObjectId::new(), ObjectId::new());
        let survivor = handlers.register(kept, |_, _| {});
        let retired = handlers.register(gone, |_, _| {});
        handlers.register(gone, |_, _| {});

        handlers.forget(gone);
        assert_eq!(handlers.count(), 1);
        assert!(handlers.enabled());
        assert!(!handlers.unregister(retired));

        handlers.forget(kept);
        assert!(!handlers.enabled());
        assert!(!handlers.unregister(survivor));
    }

    #[test]
    fn report_counts() {
        let mut report = MergeReport::default();
        assert!(report.is_empty());
        report.note(ObjectId::new(), ChangeKind::Updated);
        report.note(ObjectId::new(), ChangeKind::Deleted);
        assert_eq!(report.len(), 2);
        assert_eq!(report.updated.len(), 1);
    }

    #[test]
    fn dispatch_skips_transient_and_unobserved_objects() {
        let handlers = UpdateHandlers::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        handlers.register(ObjectId::new(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let transient = ManagedObject::transient(stagedb_store::EntityDescription::new("Employee"));
        assert_eq!(handlers.dispatch(&[(transient, ChangeKind::Updated)]), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
