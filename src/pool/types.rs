use crate::error::OrmError;
use crate::executor::Executor;

/// A connection checked out of a pool; dropping it gives the connection back
pub type PooledConnection<'p> = Box<dyn Executor + 'p>;

/// Anything that can hand out connections
///
/// Each deferred query acquires one connection when it resolves (unless it was
/// pinned with `using_connection`) and drops it on every exit path.
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection, waiting if none is free
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Pool` when no connection becomes available in time, or
    /// the connection error when a new connection cannot be opened.
    fn acquire(&self) -> Result<PooledConnection<'_>, OrmError>;
}
