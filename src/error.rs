//! Error types shared by the compiler, the deferred executor and the pool.
//!
//! Every fallible operation in this crate returns [`OrmError`]. The variants follow
//! the order in which things can go wrong while a query is being built and run:
//!
//! - [`OrmError::Config`]: malformed criteria, options or modifiers. Raised while the
//!   query is being built, before a connection is touched.
//! - [`OrmError::Validation`]: a write value outside the attribute's allowed set.
//! - [`OrmError::Database`]: the driver rejected the statement (including the
//!   "more than one row" cardinality violation from single-row operations).
//! - [`OrmError::Intercepted`]: a database failure remapped by `intercept()`.
//! - [`OrmError::Pool`]: no connection could be acquired.
//! - [`OrmError::Parse`]: a parameter or a result column could not be converted.

use std::fmt;

use may_postgres::Error as PostgresError;

use crate::query::error_handling::{SQLSTATE_CARDINALITY_VIOLATION, SQLSTATE_UNIQUE_VIOLATION};

/// A failure reported by the database driver
///
/// Only the SQLSTATE code and the rendered message are kept, so the value can be
/// cloned, compared in tests and handed to interceptor functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// Native SQLSTATE code, absent for I/O and protocol failures
    pub code: Option<String>,
    /// Driver message
    pub message: String,
}

impl DbError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }

    /// SQLSTATE code of the failure, if the server reported one
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<PostgresError> for DbError {
    fn from(err: PostgresError) -> Self {
        let code = err.code().map(|state| state.code().to_owned());
        let message = match err.as_db_error() {
            Some(db) => db.message().to_owned(),
            None => err.to_string(),
        };
        Self { code, message }
    }
}

/// Crate-wide error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrmError {
    /// Malformed options, criteria or modifiers
    Config(String),
    /// A write value failed attribute validation
    Validation {
        attribute: String,
        message: String,
    },
    /// Failure reported by the database
    Database(DbError),
    /// Database failure remapped to an application value by `intercept()`
    Intercepted(String),
    /// Connection pool errors
    Pool(String),
    /// Parameter or row conversion errors
    Parse(String),
}

impl OrmError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        OrmError::Config(message.into())
    }

    /// SQLSTATE code when this is a database failure
    pub fn code(&self) -> Option<&str> {
        match self {
            OrmError::Database(db) => db.code(),
            _ => None,
        }
    }

    /// True when a single-row operation matched more than one row
    pub fn is_ambiguity(&self) -> bool {
        self.code() == Some(SQLSTATE_CARDINALITY_VIOLATION)
    }

    /// True when the database rejected a write on a unique constraint
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(SQLSTATE_UNIQUE_VIOLATION)
    }

    /// True when the connection itself is gone and must not be reused
    ///
    /// Covers I/O and protocol failures (no SQLSTATE), class `08` connection
    /// exceptions and the `57P0x` server shutdown codes.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            OrmError::Database(db) => match db.code() {
                None => true,
                Some(code) => code.starts_with("08") || code.starts_with("57P0"),
            },
            _ => false,
        }
    }
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrmError::Config(s) => write!(f, "Configuration error: {s}"),
            OrmError::Validation { attribute, message } => {
                write!(f, "Validation error on `{attribute}`: {message}")
            }
            OrmError::Database(e) => write!(f, "Database error: {e}"),
            OrmError::Intercepted(s) => write!(f, "{s}"),
            OrmError::Pool(s) => write!(f, "Pool error: {s}"),
            OrmError::Parse(s) => write!(f, "Parse error: {s}"),
        }
    }
}

impl std::error::Error for OrmError {}

impl From<DbError> for OrmError {
    fn from(err: DbError) -> Self {
        OrmError::Database(err)
    }
}

impl From<PostgresError> for OrmError {
    fn from(err: PostgresError) -> Self {
        OrmError::Database(DbError::from(err))
    }
}

impl From<config::ConfigError> for OrmError {
    fn from(err: config::ConfigError) -> Self {
        OrmError::Config(err.to_string())
    }
}

impl From<crate::connection::ConnectionError> for OrmError {
    fn from(err: crate::connection::ConnectionError) -> Self {
        match err {
            crate::connection::ConnectionError::Driver(e) => OrmError::from(e),
            malformed @ crate::connection::ConnectionError::Malformed(_) => {
                OrmError::Config(malformed.to_string())
            }
        }
    }
}
