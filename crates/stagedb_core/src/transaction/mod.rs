//! Transactions.
//!
//! A transaction is a unit of work bound to a fresh write context:
//! - **Isolation**: the body sees its own staged state and nothing staged by
//!   other transactions
//! - **Confinement**: the context is attached to the executing thread only
//! - **Implicit commit**: a body returning `Ok` is saved through to the store
//!   unless it called `cancel_implicit_commit()`
//! - **Checkpoints**: explicit `commit()` calls are durable immediately

mod runner;
mod state;

pub(crate) use runner::{cancel_implicit_commit, commit_attached, run_bound, spawn, transact_and_wait};
pub use runner::TransactionHandle;
pub use state::{Transaction, TransactionState};
