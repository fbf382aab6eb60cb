//! Result-row normalization.

use serde_json::{Number, Value};

use super::Record;
use crate::schema::Schema;

/// Columns always read back as numbers, declared or not
const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// Normalize one row read from `schema`'s table
///
/// - `created_at` / `updated_at` are forced to numbers.
/// - A null in a column whose attribute disallows null becomes the type's zero value.
/// - Numeric attributes returned as text (`BIGINT`, `NUMERIC`) are parsed back to numbers.
///
/// Columns the schema does not declare are passed through untouched.
pub fn coerce_result_row(schema: &Schema, mut row: Record) -> Record {
    for (column, value) in row.iter_mut() {
        if TIMESTAMP_COLUMNS.contains(&column.as_str()) {
            if let Some(number) = to_number(value) {
                *value = number;
            }
        }

        let Some(attr) = schema.attribute(column) else {
            continue;
        };
        if value.is_null() {
            if !attr.allow_null {
                if let Some(zero) = attr.ty.zero_value() {
                    *value = zero;
                }
            }
        } else if attr.is_number() {
            if let Some(number) = to_number(value) {
                *value = number;
            }
        }
    }
    row
}

/// Fill nulls with declared defaults, for rows attached by populate
pub fn apply_read_defaults(schema: &Schema, mut row: Record) -> Record {
    for (column, value) in row.iter_mut() {
        if !value.is_null() {
            continue;
        }
        if let Some(attr) = schema.attribute(column) {
            if let (false, Some(default)) = (attr.allow_null, &attr.defaults_to) {
                *value = default.clone();
            }
        }
    }
    row
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => None,
        Value::String(text) => {
            let text = text.trim();
            if let Ok(int) = text.parse::<i64>() {
                Some(Value::from(int))
            } else {
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            }
        }
        _ => None,
    }
}
