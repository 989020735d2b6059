//! # StageDB Core
//!
//! Concurrency-safe staging contexts over an object store.
//!
//! This crate provides:
//! - A context hierarchy: one master save context, one main-thread read
//!   context and a disposable write context per transaction
//! - Per-thread context binding
//! - Transactions with implicit and explicit commits
//! - The commit cascade from write context through master into the store
//! - Ordered propagation of saves into the read context, with per-object
//!   update callbacks
//! - Lifecycle guards that reject wrong-thread and cross-context use at the
//!   call site

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod config;
mod context;
mod error;
mod feed;
mod guards;
mod object;
mod propagation;
mod queue;
mod stack;
mod stats;
mod transaction;
mod types;

pub use binding::{Current, ThreadBindings};
pub use config::Config;
pub use context::{Context, MergePolicy, ReadContext};
pub use error::{CoreError, CoreResult, Violation};
pub use feed::{SaveEvent, SaveFeed};
pub use object::ManagedObject;
pub use propagation::{ChangeKind, HandlerId, MergeReport};
pub use stack::Stack;
pub use stats::{StackStats, StatsSnapshot};
pub use transaction::{Transaction, TransactionHandle, TransactionState};
pub use types::{ContextId, ContextKind, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
