//! Criteria and find options, parsed from JSON into a closed set of shapes.
//!
//! Accepted criteria:
//!
//! | JSON | Meaning |
//! |---|---|
//! | `null` | every row |
//! | `7`, `"abc"` | primary key equality |
//! | `[1, 2]` | primary key membership |
//! | `{ "attr": ... }` | one [`Condition`] per attribute, joined with `AND` |
//!
//! Per attribute: `null` is `IS NULL`, an array is membership, a scalar is equality,
//! and `{ "<op>": value }` (exactly one key) is a comparison with one of
//! `<`, `>`, `<=`, `>=`, `!=`. `{ "!=": null }` is `IS NOT NULL` and
//! `{ "!=": [..] }` is negated membership. Anything else is a configuration error.
//! Attributes the schema does not declare are dropped.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde_json::{Map, Value};

use super::compile::{Limit, OrderBy};
use crate::error::OrmError;
use crate::schema::Schema;

/// Comparison operator of an operator record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Lte,
    Gte,
    Ne,
}

impl CmpOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Lte => "<=",
            CmpOp::Gte => ">=",
            CmpOp::Ne => "!=",
        }
    }
}

impl FromStr for CmpOp {
    type Err = OrmError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        match op {
            "<" => Ok(CmpOp::Lt),
            ">" => Ok(CmpOp::Gt),
            "<=" => Ok(CmpOp::Lte),
            ">=" => Ok(CmpOp::Gte),
            "!=" => Ok(CmpOp::Ne),
            other => Err(OrmError::config(format!("Unrecognised op in criteria: {other}"))),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Filter on a single attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Cmp(CmpOp, Value),
    IsNull,
    IsNotNull,
}

impl Condition {
    /// Parse the criteria value given for `attribute`
    pub fn parse(attribute: &str, value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Null => Ok(Condition::IsNull),
            Value::Array(values) => Ok(Condition::In(values.clone())),
            Value::Object(record) => Self::parse_operator(attribute, record),
            scalar => Ok(Condition::Eq(scalar.clone())),
        }
    }

    fn parse_operator(attribute: &str, record: &Map<String, Value>) -> Result<Self, OrmError> {
        let mut entries = record.iter();
        let (op, operand) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(OrmError::config(format!(
                    "Operator record for `{attribute}` must have exactly one key, found {}",
                    record.len()
                )))
            }
        };
        let op: CmpOp = op.parse()?;
        match (op, operand) {
            (CmpOp::Ne, Value::Null) => Ok(Condition::IsNotNull),
            (CmpOp::Ne, Value::Array(values)) => Ok(Condition::NotIn(values.clone())),
            (op, Value::Null | Value::Array(_) | Value::Object(_)) => Err(OrmError::config(format!(
                "Operator `{op}` on `{attribute}` needs a scalar operand"
            ))),
            (op, scalar) => Ok(Condition::Cmp(op, scalar.clone())),
        }
    }
}

/// Which rows a statement targets
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Criteria {
    #[default]
    All,
    /// Primary key shorthand
    Id(Value),
    /// Primary key membership shorthand
    Ids(Vec<Value>),
    /// Attribute conditions joined with `AND`, in declaration order
    Fields(Vec<(String, Condition)>),
}

impl Criteria {
    /// Parse criteria for `schema`, dropping undeclared attributes
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` for booleans and for operator records outside the
    /// accepted set, including those given for undeclared attributes.
    pub fn parse(schema: &Schema, value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Null => Ok(Criteria::All),
            Value::Number(_) | Value::String(_) => Ok(Criteria::Id(value.clone())),
            Value::Array(ids) => Ok(Criteria::Ids(ids.clone())),
            Value::Bool(_) => Err(OrmError::config("Criteria cannot be a boolean")),
            Value::Object(record) => {
                let mut fields = Vec::with_capacity(record.len());
                for (attribute, condition) in record {
                    // operators are checked even on keys that are about to be dropped
                    let condition = Condition::parse(attribute, condition)?;
                    if !schema.has_attribute(attribute) {
                        debug!(
                            "dropping unrecognised criteria key `{attribute}` for model {}",
                            schema.global_id()
                        );
                        continue;
                    }
                    fields.push((attribute.clone(), condition));
                }
                if fields.is_empty() {
                    Ok(Criteria::All)
                } else {
                    Ok(Criteria::Fields(fields))
                }
            }
        }
    }
}

const OPTION_KEYS: [&str; 4] = ["select", "where", "sort", "limit"];

/// `find`/`destroy` argument: bare criteria or `{ select, where, sort, limit }`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindOptions {
    pub select: Option<Vec<String>>,
    pub criteria: Criteria,
    pub sort: Option<OrderBy>,
    pub limit: Option<Limit>,
}

impl FindOptions {
    /// A non-empty object whose keys are all option names is the options form;
    /// anything else is taken as bare criteria.
    pub fn parse(schema: &Schema, value: &Value) -> Result<Self, OrmError> {
        let options = match value {
            Value::Object(record)
                if !record.is_empty()
                    && record.keys().all(|key| OPTION_KEYS.contains(&key.as_str())) =>
            {
                record
            }
            criteria => {
                return Ok(Self {
                    criteria: Criteria::parse(schema, criteria)?,
                    ..Self::default()
                })
            }
        };

        let select = match options.get("select") {
            None | Some(Value::Null) => None,
            Some(select) => Some(Self::parse_select(schema, select)?),
        };
        let criteria = Criteria::parse(schema, options.get("where").unwrap_or(&Value::Null))?;
        let sort = match options.get("sort") {
            None | Some(Value::Null) => None,
            Some(Value::String(clause)) => Some(OrderBy::parse(clause)?),
            Some(other) => {
                return Err(OrmError::config(format!("sort must be a string, got {other}")))
            }
        };
        let limit = match options.get("limit") {
            None | Some(Value::Null) => None,
            Some(limit) => Some(Limit::from_value(limit)?),
        };

        Ok(Self {
            select,
            criteria,
            sort,
            limit,
        })
    }

    fn parse_select(schema: &Schema, select: &Value) -> Result<Vec<String>, OrmError> {
        let Value::Array(names) = select else {
            return Err(OrmError::config("select must be a list of attribute names"));
        };
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let Value::String(name) = name else {
                return Err(OrmError::config(format!("select entry {name} is not a string")));
            };
            if schema.has_attribute(name) {
                columns.push(name.clone());
            } else {
                debug!("dropping unrecognised select column `{name}`");
            }
        }
        if columns.is_empty() {
            return Err(OrmError::config(format!(
                "select names no attribute of model {}",
                schema.global_id()
            )));
        }
        Ok(columns)
    }
}
