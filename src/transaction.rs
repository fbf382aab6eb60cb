//! Transaction Module
//!
//! A [`Transaction`] pins one pooled connection between `BEGIN` and
//! `COMMIT`/`ROLLBACK`. It implements [`Executor`], so deferred queries join it
//! through `using_connection(&tx)`.
//!
//! [`run`] wraps a closure: it commits when the closure succeeds, rolls back when
//! it fails and always returns the connection to the pool. A transaction dropped
//! without being closed (for instance while unwinding) is rolled back.

use std::fmt;

use log::warn;
use serde_json::Value;

use crate::error::OrmError;
use crate::executor::{Executor, QueryResult};
use crate::pool::{ConnectionPool, PooledConnection};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read uncommitted (PostgreSQL treats it as ReadCommitted)
    ReadUncommitted,
    /// Read committed (server default)
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    /// Convert to PostgreSQL SQL syntax
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// An open transaction on a pooled connection
pub struct Transaction<'p> {
    connection: PooledConnection<'p>,
    closed: bool,
}

impl<'p> Transaction<'p> {
    /// Issue `BEGIN` on `connection`
    ///
    /// # Errors
    ///
    /// Returns the database error when `BEGIN` fails; the connection is released.
    pub fn begin(
        connection: PooledConnection<'p>,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Self, OrmError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let sql = match isolation_level {
            Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.to_sql()),
            None => "BEGIN".to_string(),
        };
        connection.execute(&sql)?;

        Ok(Self {
            connection,
            closed: false,
        })
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns the database error when `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), OrmError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.closed = true;
        self.connection.execute("COMMIT").map(|_| ())
    }

    /// Roll the transaction back
    ///
    /// # Errors
    ///
    /// Returns the database error when `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), OrmError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.closed = true;
        self.connection.execute("ROLLBACK").map(|_| ())
    }
}

impl Executor for Transaction<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, OrmError> {
        self.connection.query(sql, params)
    }

    fn execute(&self, sql: &str) -> Result<u64, OrmError> {
        self.connection.execute(sql)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.connection.execute("ROLLBACK") {
                warn!("rollback of abandoned transaction failed: {e}");
            }
        }
    }
}

/// Run `f` inside a transaction on a connection from `pool`
///
/// # Errors
///
/// Returns the error of `f` after rolling back (a failed rollback is only
/// logged), or the error of `BEGIN`/`COMMIT`.
pub fn run<T, F>(
    pool: &dyn ConnectionPool,
    isolation_level: Option<IsolationLevel>,
    f: F,
) -> Result<T, OrmError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, OrmError>,
{
    let transaction = Transaction::begin(pool.acquire()?, isolation_level)?;
    match f(&transaction) {
        Ok(value) => {
            transaction.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = transaction.rollback() {
                warn!("rollback failed after {err}: {rollback_err}");
            }
            Err(err)
        }
    }
}
