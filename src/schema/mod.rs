//! Schema normalization
//!
//! Model definitions are normalized once, when the [`Registry`] is built, into
//! immutable [`Schema`] values. Global default attributes are merged into every
//! model first; an attribute declared by the model itself replaces the default of
//! the same name. The storage identifier of a model is its lower-cased name.

pub mod attribute;

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

pub use attribute::{AttributeDef, AttributeType, RawAttribute, RawValidations, Validation};

use crate::error::OrmError;

/// Model definition as declared by the application
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModel {
    #[serde(default)]
    pub attributes: IndexMap<String, RawAttribute>,
}

/// Normalized, immutable description of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    global_id: String,
    table_name: String,
    attributes: IndexMap<String, AttributeDef>,
}

impl Schema {
    /// Build a schema from already-normalized attributes
    pub fn new(name: impl Into<String>, attributes: IndexMap<String, AttributeDef>) -> Self {
        let global_id = name.into();
        Self {
            table_name: global_id.to_lowercase(),
            global_id,
            attributes,
        }
    }

    /// Start a schema declared attribute by attribute
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Normalize a declared model, merging `defaults` underneath its own attributes
    pub fn from_raw(
        name: impl Into<String>,
        raw: &RawModel,
        defaults: &IndexMap<String, RawAttribute>,
    ) -> Self {
        let mut attributes: IndexMap<String, AttributeDef> = defaults
            .iter()
            .map(|(attr, def)| (attr.clone(), AttributeDef::from(def)))
            .collect();
        for (attr, def) in &raw.attributes {
            attributes.insert(attr.clone(), AttributeDef::from(def));
        }
        Self::new(name, attributes)
    }

    /// Name the model was declared under
    pub fn global_id(&self) -> &str {
        &self.global_id
    }

    /// Registry key, identical to the table name
    pub fn identity(&self) -> &str {
        &self.table_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn attributes(&self) -> &IndexMap<String, AttributeDef> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

pub struct SchemaBuilder {
    name: String,
    attributes: IndexMap<String, AttributeDef>,
}

impl SchemaBuilder {
    pub fn attribute(mut self, name: impl Into<String>, def: AttributeDef) -> Self {
        self.attributes.insert(name.into(), def);
        self
    }

    pub fn build(self) -> Schema {
        Schema::new(self.name, self.attributes)
    }
}

/// Write-once collection of schemas, looked up case-insensitively
#[derive(Debug, Clone, Default)]
pub struct Registry {
    schemas: IndexMap<String, Arc<Schema>>,
}

impl Registry {
    /// Normalize every declared model
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when two model names collide once lower-cased.
    pub fn new(
        models: &IndexMap<String, RawModel>,
        default_attributes: &IndexMap<String, RawAttribute>,
    ) -> Result<Self, OrmError> {
        Self::from_schemas(
            models
                .iter()
                .map(|(name, raw)| Schema::from_raw(name.as_str(), raw, default_attributes)),
        )
    }

    /// Register schemas that were built directly
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when two schemas share an identity.
    pub fn from_schemas(schemas: impl IntoIterator<Item = Schema>) -> Result<Self, OrmError> {
        let mut registry = IndexMap::new();
        for schema in schemas {
            let identity = schema.identity().to_owned();
            if registry.contains_key(&identity) {
                return Err(OrmError::config(format!("Model name collision: {identity}")));
            }
            registry.insert(identity, Arc::new(schema));
        }
        Ok(Self { schemas: registry })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(&name.to_lowercase())
    }

    /// Like [`Registry::get`], failing with a configuration error for unknown names
    pub fn require(&self, name: &str) -> Result<&Arc<Schema>, OrmError> {
        self.get(name)
            .ok_or_else(|| OrmError::config(format!("Unknown model: {name}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
