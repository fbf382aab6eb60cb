//! Error classification and interception.
//!
//! Semantic error names map to zero or more native SQLSTATE codes. A deferred query
//! can register an [`Interceptor`] for a name; a database failure carrying one of
//! the mapped codes is then delivered as the interceptor's output instead of the
//! raw driver error. Failures with other codes pass through unchanged.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{DbError, OrmError};

/// `unique_violation`
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
/// `cardinality_violation`, raised when a single-row subquery matches several rows
pub const SQLSTATE_CARDINALITY_VIOLATION: &str = "21000";

/// Semantic error names callers can intercept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownError {
    /// `E_UNIQUE`: a write collided with a unique constraint
    Unique,
}

impl KnownError {
    /// Native codes this name stands for
    pub fn codes(self) -> &'static [&'static str] {
        match self {
            KnownError::Unique => &[SQLSTATE_UNIQUE_VIOLATION],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KnownError::Unique => "E_UNIQUE",
        }
    }
}

impl FromStr for KnownError {
    type Err = OrmError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "E_UNIQUE" => Ok(KnownError::Unique),
            other => Err(OrmError::config(format!(
                "No native error codes configured for \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for KnownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an intercepted failure turns into
#[derive(Clone)]
pub enum Interceptor {
    /// Reject with a fixed value
    Value(String),
    /// Reject with whatever the function builds from the raw error
    Handler(Arc<dyn Fn(&DbError) -> OrmError + Send + Sync>),
}

impl Interceptor {
    fn apply(&self, err: &DbError) -> OrmError {
        match self {
            Interceptor::Value(value) => OrmError::Intercepted(value.clone()),
            Interceptor::Handler(handler) => handler(err),
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interceptor::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Interceptor::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Native code to interceptor, later registrations win
#[derive(Debug, Clone, Default)]
pub struct Interceptors {
    entries: Vec<(&'static str, Interceptor)>,
}

impl Interceptors {
    pub fn register(&mut self, name: KnownError, interceptor: Interceptor) {
        for code in name.codes() {
            self.entries.retain(|(existing, _)| existing != code);
            self.entries.push((*code, interceptor.clone()));
        }
    }

    /// Remap `err` when its code is intercepted
    pub fn remap(&self, err: OrmError) -> OrmError {
        if let OrmError::Database(db) = &err {
            if let Some(interceptor) = db.code().and_then(|code| self.lookup(code)) {
                return interceptor.apply(db);
            }
        }
        err
    }

    fn lookup(&self, code: &str) -> Option<&Interceptor> {
        self.entries
            .iter()
            .find(|(intercepted, _)| *intercepted == code)
            .map(|(_, interceptor)| interceptor)
    }
}
