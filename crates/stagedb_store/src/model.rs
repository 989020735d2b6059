//! Entity metadata.

use crate::error::{StoreError, StoreResult};
use crate::record::Properties;
use crate::value::Value;
use std::collections::BTreeMap;

/// Metadata for one attribute of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescription {
    /// Attribute name.
    pub name: String,
    /// Value applied when an object is inserted without one.
    pub default: Value,
}

/// Metadata for an entity: its name and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescription {
    name: String,
    attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    /// Creates an entity with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute with a default value.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.attributes.push(AttributeDescription {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the attribute descriptions in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    /// Enumerates attribute names in declaration order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    /// Returns `true` if the entity declares the attribute.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// Returns every attribute set to its default value.
    #[must_use]
    pub fn defaults(&self) -> Properties {
        self.attributes
            .iter()
            .map(|a| (a.name.clone(), a.default.clone()))
            .collect()
    }
}

/// The set of entities a store knows about.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entities: BTreeMap<String, EntityDescription>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity, replacing any entity with the same name.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> StoreResult<&EntityDescription> {
        self.entities
            .get(name)
            .ok_or_else(|| StoreError::unknown_entity(name))
    }

    /// Returns the entity names in sorted order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
