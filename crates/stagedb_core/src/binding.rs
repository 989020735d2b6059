//! Per-thread context binding.
//!
//! Every thread is in one of three states with respect to a stack:
//! - the designated main thread, implicitly bound to the read context
//! - a transaction thread with exactly one write context attached
//! - unbound
//!
//! The table is owned by the stack rather than stored in ambient
//! thread-local storage, so independent stacks (and tests) never see each
//! other's bindings.

use crate::context::Context;
use crate::error::{CoreResult, Violation};
use crate::types::ContextKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// What a thread is bound to.
#[derive(Clone, Default)]
pub(crate) struct Binding {
    pub(crate) context: Option<Arc<Context>>,
    pub(crate) suppress_implicit_commit: bool,
    pub(crate) inside_merge: bool,
}

impl Binding {
    /// A fresh binding with `context` attached and both flags cleared.
    pub(crate) fn attached(context: Arc<Context>) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.context.is_none() && !self.suppress_implicit_commit && !self.inside_merge
    }
}

/// The calling thread's position in the hierarchy.
#[derive(Clone)]
pub enum Current {
    /// The designated main thread; reads go to the read context.
    Main,
    /// A thread with a write context attached.
    Attached(Arc<Context>),
    /// Nothing is bound.
    Unbound,
}

/// Thread identity to binding table.
pub struct ThreadBindings {
    main: ThreadId,
    slots: Mutex<HashMap<ThreadId, Binding>>,
}

impl ThreadBindings {
    /// Creates a table whose main thread is `main`.
    pub fn new(main: ThreadId) -> Self {
        Self {
            main,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the designated main thread.
    #[must_use]
    pub fn main_thread(&self) -> ThreadId {
        self.main
    }

    /// Returns `true` when called on the main thread.
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }

    /// Attaches a write context to the calling thread.
    ///
    /// # Errors
    ///
    /// Fails on the main thread, which never owns a write context, and for
    /// contexts that are not write contexts.
    pub fn attach(&self, context: Arc<Context>) -> CoreResult<()> {
        if self.is_main_thread() {
            return Err(Violation::IllegalThread { operation: "attach" }.into());
        }
        if context.kind() != ContextKind::Write {
            return Err(Violation::NotAWriteContext.into());
        }
        self.update(|b| b.context = Some(context));
        Ok(())
    }

    /// Detaches whatever is attached to the calling thread.
    pub fn detach(&self) {
        self.update(|b| b.context = None);
    }

    /// Returns the calling thread's position in the hierarchy.
    #[must_use]
    pub fn current(&self) -> Current {
        if self.is_main_thread() {
            return Current::Main;
        }
        match self.attached() {
            Some(context) => Current::Attached(context),
            None => Current::Unbound,
        }
    }

    /// Returns the write context attached to the calling thread.
    #[must_use]
    pub fn attached(&self) -> Option<Arc<Context>> {
        self.slots
            .lock()
            .get(&thread::current().id())
            .and_then(|b| b.context.clone())
    }

    /// Sets the suppress-implicit-commit flag of the calling thread.
    ///
    /// # Errors
    ///
    /// Fails when no write context is attached.
    pub fn set_suppress_implicit_commit(&self, value: bool) -> CoreResult<()> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&thread::current().id()) {
            Some(binding) if binding.context.is_some() => {
                binding.suppress_implicit_commit = value;
                Ok(())
            }
            _ => Err(Violation::NoContext {
                operation: "set_suppress_implicit_commit",
            }
            .into()),
        }
    }

    /// Returns the suppress-implicit-commit flag of the calling thread.
    #[must_use]
    pub fn suppress_implicit_commit(&self) -> bool {
        self.slots
            .lock()
            .get(&thread::current().id())
            .is_some_and(|b| b.suppress_implicit_commit)
    }

    /// Returns `true` while the calling thread is inside a sanctioned merge.
    #[must_use]
    pub fn inside_merge(&self) -> bool {
        self.slots
            .lock()
            .get(&thread::current().id())
            .is_some_and(|b| b.inside_merge)
    }

    /// Number of threads with a non-empty binding.
    #[must_use]
    pub fn bound_thread_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Swaps the calling thread's binding, returning the previous one.
    pub(crate) fn replace(&self, binding: Binding) -> Binding {
        let id = thread::current().id();
        let mut slots = self.slots.lock();
        let previous = slots.remove(&id).unwrap_or_default();
        if !binding.is_empty() {
            slots.insert(id, binding);
        }
        previous
    }

    /// Runs `f` with the inside-merge flag set on the calling thread.
    ///
    /// The previous flag value is restored afterwards, including on unwind.
    pub(crate) fn with_merge_window<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.set_inside_merge(true);
        let _restore = MergeWindow {
            bindings: self,
            previous,
        };
        f()
    }

    fn set_inside_merge(&self, value: bool) -> bool {
        let mut previous = false;
        self.update(|b| {
            previous = b.inside_merge;
            b.inside_merge = value;
        });
        previous
    }

    fn update(&self, f: impl FnOnce(&mut Binding)) {
        let id = thread::current().id();
        let mut slots = self.slots.lock();
        let mut binding = slots.remove(&id).unwrap_or_default();
        f(&mut binding);
        if !binding.is_empty() {
            slots.insert(id, binding);
        }
    }
}

impl std::fmt::Debug for ThreadBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadBindings")
            .field("main", &self.main)
            .field("bound_threads", &self.bound_thread_count())
            .finish()
    }
}

struct MergeWindow<'a> {
    bindings: &'a ThreadBindings,
    previous: bool,
}

impl Drop for MergeWindow<'_> {
    fn drop(&mut self) {
        self.bindings.set_inside_merge(self.previous);
    }
}

/// Restores a thread's previous binding when dropped.
pub(crate) struct RestoreBinding<'a> {
    bindings: &'a ThreadBindings,
    previous: Option<Binding>,
}

impl<'a> RestoreBinding<'a> {
    /// Installs `binding` on the calling thread until the guard drops.
    pub(crate) fn install(bindings: &'a ThreadBindings, binding: Binding) -> Self {
        let previous = bindings.replace(binding);
        Self {
            bindings,
            previous: Some(previous),
        }
    }
}

impl Drop for RestoreBinding<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.bindings.replace(previous);
        }
    }
}
