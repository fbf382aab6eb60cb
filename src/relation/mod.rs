//! Relations between models
//!
//! A relation is a foreign key attribute declared with `model: "<entity>"`. It is
//! stored as the referenced row's `id`; [`eager`] replaces that id with the row
//! itself when a query asks to populate the attribute.

pub mod eager;

use std::sync::Arc;

use crate::error::OrmError;
use crate::schema::{Registry, Schema};

/// A foreign key attribute to populate and the schema it references
#[derive(Debug, Clone)]
pub struct Populate {
    pub attribute: String,
    pub related: Arc<Schema>,
}

impl Populate {
    /// Resolve `attribute` of `schema` to its related schema
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when the attribute is unknown, is not a foreign
    /// key, or references a model that was never registered.
    pub fn resolve(registry: &Registry, schema: &Schema, attribute: &str) -> Result<Self, OrmError> {
        let def = schema.attribute(attribute).ok_or_else(|| {
            OrmError::config(format!(
                "Cannot populate unknown attribute {attribute} of {}",
                schema.global_id()
            ))
        })?;
        let entity = def.related_entity.as_deref().ok_or_else(|| {
            OrmError::config(format!(
                "Attribute {attribute} of {} is not a relationship",
                schema.global_id()
            ))
        })?;
        Ok(Self {
            attribute: attribute.to_string(),
            related: Arc::clone(registry.require(entity)?),
        })
    }
}
