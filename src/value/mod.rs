//! Value coercion layer
//!
//! Dynamic values are `serde_json::Value`s throughout. Write values are carried as
//! [`Arg`]s so the "statement timestamp" can travel through the parameter list as
//! an explicit sentinel; the executor replaces every sentinel of one statement
//! with the same epoch-millisecond value right before dispatch.
//!
//! - [`defaults`] computes default and auto-generated values for writes.
//! - [`coerce`] normalizes result rows according to the schema.

pub mod coerce;
pub mod defaults;

use indexmap::IndexMap;
use serde_json::{Map, Value};

pub use coerce::{apply_read_defaults, coerce_result_row};
pub use defaults::{compute_defaults, validate_properties, without_unrecognised};

/// One result row, keyed by column name
pub type Record = Map<String, Value>;

/// Effective column values of a write, in schema order
pub type Props = IndexMap<String, Arg>;

/// A statement argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Bound as-is
    Value(Value),
    /// Replaced by the statement timestamp when the statement is dispatched
    StatementTimestamp,
}

impl Arg {
    /// Concrete value of this argument for a statement dispatched at `now`
    pub fn resolve(&self, now: i64) -> Value {
        match self {
            Arg::Value(value) => value.clone(),
            Arg::StatementTimestamp => Value::from(now),
        }
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Arg::StatementTimestamp)
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn statement_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Resolve every argument of one statement against a single timestamp
pub fn resolve_args(args: &[Arg], now: i64) -> Vec<Value> {
    args.iter().map(|arg| arg.resolve(now)).collect()
}
