//! Clause compilation
//!
//! Identifiers are always double-quoted (embedded quotes doubled); values are
//! always bound as `$n` parameters. Numbering continues across clauses through a
//! shared [`Params`] list so `SET` and `WHERE` of one statement never collide.

use serde_json::Value;

use super::criteria::{Condition, Criteria};
use crate::error::OrmError;
use crate::schema::Schema;
use crate::value::{Arg, Props};

/// Largest integer a limit may carry (2^53 - 1)
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Quote an identifier for PostgreSQL
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"namespace"."table"`
pub fn qualified_table(namespace: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(table))
}

/// Arguments of one statement in placeholder order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    args: Vec<Arg>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument and return its placeholder
    pub fn push(&mut self, arg: Arg) -> String {
        self.args.push(arg);
        format!("${}", self.args.len())
    }

    pub fn push_value(&mut self, value: Value) -> String {
        self.push(Arg::Value(value))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_args(self) -> Vec<Arg> {
        self.args
    }
}

/// Body of a `WHERE` clause, or `None` when every row is targeted
pub fn compile_where(criteria: &Criteria, params: &mut Params) -> Option<String> {
    match criteria {
        Criteria::All => None,
        Criteria::Id(id) => Some(format!("{} = {}", quote_ident("id"), params.push_value(id.clone()))),
        Criteria::Ids(ids) => Some(format!(
            "{} = ANY({})",
            quote_ident("id"),
            params.push_value(Value::Array(ids.clone()))
        )),
        Criteria::Fields(fields) => {
            let clauses: Vec<String> = fields
                .iter()
                .map(|(attribute, condition)| compile_condition(attribute, condition, params))
                .collect();
            Some(clauses.join(" AND "))
        }
    }
}

fn compile_condition(attribute: &str, condition: &Condition, params: &mut Params) -> String {
    let column = quote_ident(attribute);
    match condition {
        Condition::IsNull => format!("{column} IS NULL"),
        Condition::IsNotNull => format!("{column} IS NOT NULL"),
        Condition::Eq(value) => format!("{column} = {}", params.push_value(value.clone())),
        Condition::In(values) => {
            format!("{column} = ANY({})", params.push_value(Value::Array(values.clone())))
        }
        Condition::NotIn(values) => {
            format!("NOT ({column} = ANY({}))", params.push_value(Value::Array(values.clone())))
        }
        Condition::Cmp(op, value) => {
            format!("{column} {} {}", op.as_sql(), params.push_value(value.clone()))
        }
    }
}

/// Body of a `SET` clause, or `None` when there is nothing to set
pub fn compile_set(schema: &Schema, props: &Props, params: &mut Params) -> Option<String> {
    if props.is_empty() {
        return None;
    }
    let assignments: Vec<String> = props
        .iter()
        .map(|(attribute, arg)| {
            let placeholder = params.push(bind_for(schema, attribute, arg));
            format!("{} = {placeholder}", quote_ident(attribute))
        })
        .collect();
    Some(assignments.join(", "))
}

/// Column list and `VALUES` rows of an insert
///
/// Columns are the union of every row's columns in schema order; a row lacking
/// a column contributes `DEFAULT`. With no columns at all the insert falls back
/// to `DEFAULT VALUES` (one row) or `DEFAULT` in the first declared column.
///
/// # Errors
///
/// Returns `OrmError::Config` when there are no rows, or when several
/// column-less rows target a schema without attributes.
pub fn compile_values(schema: &Schema, rows: &[Props], params: &mut Params) -> Result<String, OrmError> {
    if rows.is_empty() {
        return Err(OrmError::config("insert needs at least one row"));
    }

    let mut columns: Vec<&str> = schema
        .attributes()
        .keys()
        .map(String::as_str)
        .filter(|attribute| rows.iter().any(|row| row.contains_key(*attribute)))
        .collect();

    if columns.is_empty() {
        if rows.len() == 1 {
            return Ok("DEFAULT VALUES".to_string());
        }
        let first = schema.attributes().keys().next().ok_or_else(|| {
            OrmError::config(format!("model {} declares no attributes", schema.global_id()))
        })?;
        columns.push(first.as_str());
    }

    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = columns
                .iter()
                .map(|column| match row.get(*column) {
                    Some(arg) => params.push(bind_for(schema, column, arg)),
                    None => "DEFAULT".to_string(),
                })
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();

    let column_list: Vec<String> = columns.iter().map(|column| quote_ident(column)).collect();
    Ok(format!("({}) VALUES {}", column_list.join(", "), tuples.join(", ")))
}

/// JSON attributes are bound as their serialized text
fn bind_for(schema: &Schema, attribute: &str, arg: &Arg) -> Arg {
    match (schema.attribute(attribute), arg) {
        (Some(attr), Arg::Value(value)) if attr.is_json() && !value.is_null() => {
            Arg::Value(Value::String(value.to_string()))
        }
        _ => arg.clone(),
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// `ORDER BY` of a single column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    column: String,
    direction: Option<Direction>,
}

impl OrderBy {
    /// Parse `"<column>"` or `"<column> <ASC|DESC>"`
    ///
    /// Whitespace is normalized and the direction is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` for an empty clause, more than two tokens, or an
    /// unknown direction.
    pub fn parse(clause: &str) -> Result<Self, OrmError> {
        let tokens: Vec<&str> = clause.split_whitespace().collect();
        let (column, direction) = match tokens.as_slice() {
            [column] => (*column, None),
            [column, direction] => (*column, Some(*direction)),
            [] => return Err(OrmError::config("Empty ORDER BY clause")),
            _ => {
                return Err(OrmError::config(format!(
                    "Too many parts in ORDER BY clause: \"{clause}\""
                )))
            }
        };
        let direction = match direction.map(str::to_uppercase).as_deref() {
            None => None,
            Some("ASC") => Some(Direction::Asc),
            Some("DESC") => Some(Direction::Desc),
            Some(other) => {
                return Err(OrmError::config(format!(
                    "Unexpected direction provided in ORDER BY clause: \"{other}\""
                )))
            }
        };
        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }

    pub fn to_sql(&self) -> String {
        let column = quote_ident(&self.column);
        match self.direction {
            None => format!(" ORDER BY {column}"),
            Some(Direction::Asc) => format!(" ORDER BY {column} ASC"),
            Some(Direction::Desc) => format!(" ORDER BY {column} DESC"),
        }
    }
}

/// `LIMIT` with a validated integer literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(i64);

impl Limit {
    /// # Errors
    ///
    /// Returns `OrmError::Config` when `n` is outside the safe integer range.
    pub fn new(n: i64) -> Result<Self, OrmError> {
        if n.abs() > MAX_SAFE_INTEGER {
            return Err(OrmError::config(format!("limit {n} is not a safe integer")));
        }
        Ok(Self(n))
    }

    /// Accept an integral JSON number within the safe range
    pub fn from_value(value: &Value) -> Result<Self, OrmError> {
        if let Some(n) = value.as_i64() {
            return Self::new(n);
        }
        match value.as_f64() {
            Some(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 => Self::new(n as i64),
            _ => Err(OrmError::config(format!("limit {value} is not a safe integer"))),
        }
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn to_sql(self) -> String {
        format!(" LIMIT {}", self.0)
    }
}
