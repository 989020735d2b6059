//! # StageDB Store
//!
//! The object-store boundary consumed by StageDB's context hierarchy.
//!
//! This crate defines what the staging layer expects from the persistence
//! engine underneath it, and nothing more:
//!
//! - Object identity ([`ObjectId`]) that is stable across contexts
//! - Entity metadata ([`EntityDescription`]) used to apply defaults
//! - Identity lookup and fetch-by-entity
//! - An atomic `save` of a [`ChangeSet`] that yields a [`SaveReceipt`]
//!
//! ## Design Principles
//!
//! - Stores are opaque to the staging layer: no query language, no format
//! - Only the master save context ever calls [`ObjectStore::save`]
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Reference implementation for tests and demos
//!
//! ## Example
//!
//! ```rust
//! use stagedb_store::{ChangeSet, EntityDescription, InMemoryStore, Model, ObjectId, ObjectStore, Record};
//!
//! let model = Model::new().with_entity(EntityDescription::new("Employee").attribute("salary", 0));
//! let store = InMemoryStore::new(model);
//!
//! let id = ObjectId::new();
//! let mut changes = ChangeSet::new();
//! changes.insert(Record::new(id, "Employee").with("salary", 10_000));
//! store.save(&changes).unwrap();
//!
//! let record = store.fetch(id).unwrap().unwrap();
//! assert_eq!(record.get("salary").and_then(|v| v.as_i64()), Some(10_000));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod memory;
mod model;
mod record;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use id::ObjectId;
pub use memory::InMemoryStore;
pub use model::{AttributeDescription, EntityDescription, Model};
pub use record::{ChangeSet, Properties, Record, SaveReceipt};
pub use store::ObjectStore;
pub use value::Value;
