//! Object lifecycle guards.
//!
//! Each guard validates the calling thread and its binding before touching a
//! context, so misuse fails at the offending call instead of at save time.

use crate::binding::Current;
use crate::context::{Context, Hierarchy};
use crate::error::{CoreResult, Violation};
use crate::object::ManagedObject;
use crate::propagation::{ChangeKind, HandlerId};
use crate::types::ContextKind;
use std::sync::Arc;
use tracing::trace;

/// The write context attached to a non-main calling thread.
fn attached(hierarchy: &Hierarchy, operation: &'static str) -> CoreResult<Arc<Context>> {
    match hierarchy.bindings.current() {
        Current::Main => Err(Violation::MainThread { operation }.into()),
        Current::Attached(context) => Ok(context),
        Current::Unbound => Err(Violation::NoContext { operation }.into()),
    }
}

pub(crate) fn create(
    hierarchy: &Hierarchy,
    entity: &str,
    transient: bool,
) -> CoreResult<ManagedObject> {
    if transient {
        let description = hierarchy.master.entity(entity)?;
        trace!(entity, "created transient object");
        return Ok(ManagedObject::transient(description));
    }
    let context = attached(hierarchy, "create")?;
    let object = context.create(entity)?;
    trace!(entity, context = %context.id(), "created object");
    Ok(object)
}

pub(crate) fn insert(hierarchy: &Hierarchy, object: &ManagedObject) -> CoreResult<()> {
    let context = attached(hierarchy, "insert")?;
    match object.context_id() {
        Some(owner) if owner == context.id() => {
            trace!(context = %owner, "insert of already owned object ignored");
            Ok(())
        }
        Some(_) => Err(Violation::CrossContext { operation: "insert" }.into()),
        None => {
            context.insert(object)?;
            trace!(context = %context.id(), object = ?object.id(), "inserted transient object");
            Ok(())
        }
    }
}

pub(crate) fn delete(hierarchy: &Hierarchy, object: &ManagedObject) -> CoreResult<()> {
    let context = attached(hierarchy, "delete")?;
    match object.context_id() {
        None => Err(Violation::Unowned { operation: "delete" }.into()),
        Some(owner) if owner != context.id() => {
            Err(Violation::CrossContext { operation: "delete" }.into())
        }
        Some(_) => {
            context.delete(object)?;
            trace!(context = %context.id(), object = ?object.id(), "deleted object");
            Ok(())
        }
    }
}

pub(crate) fn use_in_current_context(
    hierarchy: &Hierarchy,
    object: &ManagedObject,
) -> CoreResult<Option<ManagedObject>> {
    const OPERATION: &str = "use_in_current_context";

    let target = hierarchy.current().ok_or(Violation::NoContext {
        operation: OPERATION,
    })?;
    let (Some(id), Some(owner)) = (object.id(), object.owner()) else {
        return Err(Violation::TransientObject {
            operation: OPERATION,
        }
        .into());
    };
    if let Some(source) = owner.context.upgrade() {
        if source.has_changes() {
            return Err(Violation::UnsavedChanges.into());
        }
    }

    let resolved = target.transplant(id, object.description().clone())?;
    trace!(
        object = %id,
        from = %owner.id,
        to = %target.id(),
        found = resolved.is_some(),
        "transplanted object"
    );
    Ok(resolved)
}

pub(crate) fn current_transaction_context(hierarchy: &Hierarchy) -> CoreResult<Arc<Context>> {
    match hierarchy.bindings.current() {
        Current::Attached(context) => Ok(context),
        _ => Err(Violation::NotInTransaction {
            operation: "current_transaction_context",
        }
        .into()),
    }
}

pub(crate) fn register_update_handler(
    hierarchy: &Hierarchy,
    object: &ManagedObject,
    callback: impl Fn(&ManagedObject, ChangeKind) + Send + Sync + 'static,
) -> CoreResult<HandlerId> {
    const OPERATION: &str = "register_update_handler";

    hierarchy.require_main(OPERATION)?;
    let Some(id) = object.id() else {
        return Err(Violation::TransientObject {
            operation: OPERATION,
        }
        .into());
    };
    match object.owner() {
        Some(owner) if owner.kind == ContextKind::Read => {
            Ok(hierarchy.handlers.register(id, callback))
        }
        _ => Err(Violation::CrossContext {
            operation: OPERATION,
        }
        .into()),
    }
}
