//! Default and auto-generated values for writes.

use log::debug;
use serde_json::Value;

use super::{Arg, Props, Record};
use crate::error::OrmError;
use crate::schema::{AttributeDef, Schema};

/// Copy of `props` without keys the schema does not declare
pub fn without_unrecognised(schema: &Schema, props: &Record) -> Record {
    props
        .iter()
        .filter(|(key, _)| {
            let known = schema.has_attribute(key);
            if !known {
                debug!(
                    "dropping unrecognised attribute `{key}` for model {}",
                    schema.global_id()
                );
            }
            known
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Check write values against each attribute's allowed-value set
///
/// A null passes on attributes that allow null.
///
/// # Errors
///
/// Returns `OrmError::Validation` naming the first offending attribute.
pub fn validate_properties(schema: &Schema, props: &Record) -> Result<(), OrmError> {
    for (key, value) in props {
        let Some(attr) = schema.attribute(key) else {
            continue;
        };
        let Some(validation) = &attr.validation else {
            continue;
        };
        if value.is_null() && attr.allow_null {
            continue;
        }
        if !validation.allows(value) {
            return Err(OrmError::Validation {
                attribute: key.clone(),
                message: format!("supplied value {value} is not allowed"),
            });
        }
    }
    Ok(())
}

/// Effective column values for an insert (`creating`) or an update
///
/// Walks the schema in declaration order. For each attribute:
///
/// - a supplied non-null value is kept;
/// - an absent attribute on insert takes its `defaultsTo`, else the statement
///   timestamp when it is auto-created or auto-updated, else the type's zero value
///   when null is disallowed and it is not auto-increment;
/// - an absent attribute on update is only set when it is auto-updated;
/// - a supplied null takes `defaultsTo` on insert, the statement timestamp when
///   auto-generated for this kind of write, else the zero value when null is
///   disallowed.
pub fn compute_defaults(schema: &Schema, props: &Record, creating: bool) -> Props {
    let mut out = Props::new();
    for (name, attr) in schema.attributes() {
        let arg = match props.get(name) {
            Some(Value::Null) => Some(null_replacement(attr, creating)),
            Some(value) => Some(Arg::Value(value.clone())),
            None if creating => absent_on_insert(attr),
            None if attr.auto_updated_at => Some(Arg::StatementTimestamp),
            None => None,
        };
        if let Some(arg) = arg {
            out.insert(name.clone(), arg);
        }
    }
    out
}

fn absent_on_insert(attr: &AttributeDef) -> Option<Arg> {
    if let Some(default) = &attr.defaults_to {
        return Some(Arg::Value(default.clone()));
    }
    if attr.auto_created_at || attr.auto_updated_at {
        return Some(Arg::StatementTimestamp);
    }
    if !attr.allow_null && !attr.auto_increment {
        return attr.ty.zero_value().map(Arg::Value);
    }
    None
}

fn null_replacement(attr: &AttributeDef, creating: bool) -> Arg {
    if creating {
        if let Some(default) = &attr.defaults_to {
            return Arg::Value(default.clone());
        }
    }
    if attr.auto_created_at {
        // an explicit null on an update leaves the creation time as written
        return if creating {
            Arg::StatementTimestamp
        } else {
            Arg::Value(Value::Null)
        };
    }
    if attr.auto_updated_at {
        return Arg::StatementTimestamp;
    }
    if !attr.allow_null && !attr.auto_increment {
        if let Some(zero) = attr.ty.zero_value() {
            return Arg::Value(zero);
        }
    }
    Arg::Value(Value::Null)
}
