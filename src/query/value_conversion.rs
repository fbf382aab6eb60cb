//! Value conversion between JSON values and `may_postgres`.
//!
//! Parameters are converted against the types PostgreSQL inferred for the prepared
//! statement, so a JSON number can be bound to `INT4`, `INT8`, `FLOAT8` or
//! `NUMERIC` alike, and an array to any supported array type. Result columns are
//! read back by their declared type.
//!
//! Strings bound to `json`/`jsonb` parameters are taken as JSON text; any other
//! value is serialized first.

use std::error::Error;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use may_postgres::types::{IsNull, Kind, ToSql, Type};
use may_postgres::Row;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use uuid::Uuid;

use crate::error::OrmError;
use crate::value::Record;

type BoxedParam = Box<dyn ToSql>;

/// SQL `NULL` of whatever type the parameter has
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Pre-serialized JSON document
#[derive(Debug)]
struct JsonText(String);

impl ToSql for JsonText {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if *ty == Type::JSONB {
            // jsonb binary format version
            out.put_u8(1);
        }
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::JSON || *ty == Type::JSONB
    }

    postgres_types::to_sql_checked!();
}

/// Text sent verbatim, for enum labels whose binary format is their text
#[derive(Debug)]
struct Label(String);

impl ToSql for Label {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }

    postgres_types::to_sql_checked!();
}

fn mismatch(ty: &Type, value: &Value) -> OrmError {
    OrmError::Parse(format!("cannot bind {value} to a parameter of type {}", ty.name()))
}

/// Convert statement arguments to boxed `ToSql` values, one per parameter type.
///
/// # Errors
///
/// Returns `OrmError::Parse` when the argument count does not match the statement
/// or a value cannot be represented in its parameter's type.
pub fn to_sql_params(types: &[Type], values: &[Value]) -> Result<Vec<BoxedParam>, OrmError> {
    if types.len() != values.len() {
        return Err(OrmError::Parse(format!(
            "statement expects {} parameters, {} supplied",
            types.len(),
            values.len()
        )));
    }
    types
        .iter()
        .zip(values)
        .map(|(ty, value)| to_sql_param(ty, value))
        .collect()
}

/// Convert one value for a parameter of type `ty`
pub fn to_sql_param(ty: &Type, value: &Value) -> Result<BoxedParam, OrmError> {
    if value.is_null() {
        return Ok(Box::new(SqlNull));
    }
    match ty.kind() {
        Kind::Array(element) => {
            let items: Vec<Value> = match value {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            to_array_param(ty, element, &items)
        }
        Kind::Enum(_) => match value {
            Value::String(label) => Ok(Box::new(Label(label.clone()))),
            other => Err(mismatch(ty, other)),
        },
        _ => to_scalar_param(ty, value),
    }
}

fn to_scalar_param(ty: &Type, value: &Value) -> Result<BoxedParam, OrmError> {
    let param: BoxedParam = match ty.name() {
        "bool" => Box::new(as_bool(ty, value)?),
        "int2" => Box::new(i16::try_from(as_i64(ty, value)?).map_err(|_| mismatch(ty, value))?),
        "int4" => Box::new(i32::try_from(as_i64(ty, value)?).map_err(|_| mismatch(ty, value))?),
        "int8" => Box::new(as_i64(ty, value)?),
        "oid" => Box::new(u32::try_from(as_i64(ty, value)?).map_err(|_| mismatch(ty, value))?),
        "float4" => Box::new(as_f64(ty, value)? as f32),
        "float8" => Box::new(as_f64(ty, value)?),
        "numeric" => Box::new(as_decimal(ty, value)?),
        "text" | "varchar" | "bpchar" | "name" | "unknown" => Box::new(as_text(value)),
        "json" | "jsonb" => Box::new(JsonText(as_text(value))),
        "timestamptz" => Box::new(as_datetime(ty, value)?),
        "timestamp" => Box::new(as_datetime(ty, value)?.naive_utc()),
        "date" => Box::new(as_date(ty, value)?),
        "uuid" => Box::new(as_uuid(ty, value)?),
        other => {
            return Err(OrmError::Parse(format!("unsupported parameter type {other}")));
        }
    };
    Ok(param)
}

fn to_array_param(ty: &Type, element: &Type, items: &[Value]) -> Result<BoxedParam, OrmError> {
    fn collect<T: ToSql + 'static>(
        items: &[Value],
        convert: impl Fn(&Value) -> Result<T, OrmError>,
    ) -> Result<BoxedParam, OrmError> {
        let values = items
            .iter()
            .map(|item| match item {
                Value::Null => Ok(None),
                item => convert(item).map(Some),
            })
            .collect::<Result<Vec<Option<T>>, OrmError>>()?;
        Ok(Box::new(values))
    }

    match element.name() {
        "bool" => collect(items, |v| as_bool(element, v)),
        "int2" => collect(items, |v| {
            i16::try_from(as_i64(element, v)?).map_err(|_| mismatch(element, v))
        }),
        "int4" => collect(items, |v| {
            i32::try_from(as_i64(element, v)?).map_err(|_| mismatch(element, v))
        }),
        "int8" => collect(items, |v| as_i64(element, v)),
        "float8" => collect(items, |v| as_f64(element, v)),
        "numeric" => collect(items, |v| as_decimal(element, v)),
        "text" | "varchar" | "bpchar" | "name" => collect(items, |v| Ok(as_text(v))),
        "uuid" => collect(items, |v| as_uuid(element, v)),
        "timestamptz" => collect(items, |v| as_datetime(element, v)),
        _ => Err(OrmError::Parse(format!("unsupported parameter type {}", ty.name()))),
    }
}

fn as_bool(ty: &Type, value: &Value) -> Result<bool, OrmError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(mismatch(ty, other)),
    }
}

fn as_i64(ty: &Type, value: &Value) -> Result<i64, OrmError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| mismatch(ty, value)),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(ty, value)),
        other => Err(mismatch(ty, other)),
    }
}

fn as_f64(ty: &Type, value: &Value) -> Result<f64, OrmError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(ty, value)),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(ty, value)),
        other => Err(mismatch(ty, other)),
    }
}

fn as_decimal(ty: &Type, value: &Value) -> Result<Decimal, OrmError> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map_err(|_| mismatch(ty, value)),
        Value::String(s) => Decimal::from_str(s.trim()).map_err(|_| mismatch(ty, value)),
        other => Err(mismatch(ty, other)),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Epoch milliseconds or an RFC 3339 string
fn as_datetime(ty: &Type, value: &Value) -> Result<DateTime<Utc>, OrmError> {
    match value {
        Value::Number(_) => {
            let millis = as_i64(ty, value)?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| mismatch(ty, value))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| mismatch(ty, value)),
        other => Err(mismatch(ty, other)),
    }
}

fn as_date(ty: &Type, value: &Value) -> Result<NaiveDate, OrmError> {
    match value {
        Value::String(s) => NaiveDate::from_str(s).map_err(|_| mismatch(ty, value)),
        _ => as_datetime(ty, value).map(|dt| dt.date_naive()),
    }
}

fn as_uuid(ty: &Type, value: &Value) -> Result<Uuid, OrmError> {
    match value {
        Value::String(s) => Uuid::parse_str(s).map_err(|_| mismatch(ty, value)),
        other => Err(mismatch(ty, other)),
    }
}

/// Convert a result row to a [`Record`] keyed by column name.
///
/// `NUMERIC` columns are returned as strings so no precision is lost; the schema
/// coercion step turns declared numeric attributes back into numbers. Timestamps
/// are rendered as RFC 3339 strings.
pub fn row_to_record(row: &Row) -> Result<Record, OrmError> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_())
            .map_err(|e| OrmError::Parse(format!("column `{}`: {e}", column.name())))?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Result<Value, Box<dyn Error + Sync + Send>> {
    if let Kind::Array(element) = ty.kind() {
        return array_value(row, idx, element);
    }

    let value = match ty.name() {
        "bool" => opt(row.try_get::<_, Option<bool>>(idx)?),
        "int2" => opt(row.try_get::<_, Option<i16>>(idx)?),
        "int4" => opt(row.try_get::<_, Option<i32>>(idx)?),
        "int8" => opt(row.try_get::<_, Option<i64>>(idx)?),
        "oid" => opt(row.try_get::<_, Option<u32>>(idx)?),
        "float4" => float(row.try_get::<_, Option<f32>>(idx)?.map(f64::from)),
        "float8" => float(row.try_get::<_, Option<f64>>(idx)?),
        "numeric" => opt(row.try_get::<_, Option<Decimal>>(idx)?.map(|d| d.to_string())),
        "text" | "varchar" | "bpchar" | "name" | "unknown" => {
            opt(row.try_get::<_, Option<String>>(idx)?)
        }
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?.unwrap_or(Value::Null),
        "timestamptz" => opt(row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|dt| dt.to_rfc3339())),
        "timestamp" => opt(row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "date" => opt(row.try_get::<_, Option<NaiveDate>>(idx)?.map(|d| d.to_string())),
        "uuid" => opt(row.try_get::<_, Option<Uuid>>(idx)?.map(|u| u.to_string())),
        other => return Err(format!("unsupported column type {other}").into()),
    };
    Ok(value)
}

fn array_value(row: &Row, idx: usize, element: &Type) -> Result<Value, Box<dyn Error + Sync + Send>> {
    fn list<T: Into<Value>>(items: Option<Vec<Option<T>>>) -> Value {
        match items {
            None => Value::Null,
            Some(items) => Value::Array(items.into_iter().map(opt).collect()),
        }
    }

    let value = match element.name() {
        "bool" => list(row.try_get::<_, Option<Vec<Option<bool>>>>(idx)?),
        "int2" => list(row.try_get::<_, Option<Vec<Option<i16>>>>(idx)?),
        "int4" => list(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?),
        "int8" => list(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)?),
        "float8" => list(row.try_get::<_, Option<Vec<Option<f64>>>>(idx)?),
        "text" | "varchar" | "bpchar" | "name" => {
            list(row.try_get::<_, Option<Vec<Option<String>>>>(idx)?)
        }
        other => return Err(format!("unsupported column type {other}[]").into()),
    };
    Ok(value)
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}
