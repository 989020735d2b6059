//! # StageDB Testkit
//!
//! Test utilities for StageDB.
//!
//! This crate provides:
//! - An employee model and initialized stacks over an in-memory store
//! - Property-based test generators using proptest
//! - Stress harnesses for concurrent transactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stagedb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_stack() {
//!     with_test_stack(|stack| {
//!         let id = stack.insert_employee("Ada", 10_000);
//!         stack.settle();
//!         assert!(stack.read_value(id, "salary").is_some());
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
