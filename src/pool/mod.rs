//! Connection pooling
//!
//! [`ConnectionPool`] is the handle the query engine needs; [`DbPool`] is the
//! `may_postgres` implementation.

pub mod config;
pub mod manager;
pub mod types;

pub use config::DatabaseConfig;
pub use manager::DbPool;
pub use types::{ConnectionPool, PooledConnection};
