//! Helpers for tests that run against a live PostgreSQL
//!
//! Tests read the connection string from `TEST_DATABASE_URL` and skip when it is
//! unset, so the suite still passes on machines without a database.

use std::sync::Arc;

use crate::datastore::Datastore;
use crate::error::OrmError;
use crate::executor::Executor;
use crate::pool::{DatabaseConfig, DbPool};
use crate::query::compile::quote_ident;
use crate::schema::Registry;

pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// A database reachable from tests
#[derive(Debug, Clone)]
pub struct TestDatabase {
    url: String,
}

impl TestDatabase {
    /// `None` when `TEST_DATABASE_URL` is unset or empty
    pub fn from_env() -> Option<Self> {
        std::env::var(TEST_DATABASE_URL)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self, max_connections: usize) -> DatabaseConfig {
        DatabaseConfig {
            url: self.url.clone(),
            max_connections,
            ..DatabaseConfig::default()
        }
    }

    /// Datastore over a fresh pool of `max_connections`
    pub fn datastore(&self, registry: Registry, max_connections: usize) -> Result<Datastore, OrmError> {
        let pool = DbPool::new(&self.config(max_connections))?;
        Ok(Datastore::new(registry, Arc::new(pool)))
    }
}

/// Drop and recreate `name` with the given column definitions
pub fn recreate_table<E: Executor + ?Sized>(executor: &E, name: &str, columns: &str) -> Result<(), OrmError> {
    drop_table(executor, name)?;
    executor.execute(&format!("CREATE TABLE {} ({columns})", quote_ident(name)))?;
    Ok(())
}

pub fn drop_table<E: Executor + ?Sized>(executor: &E, name: &str) -> Result<(), OrmError> {
    executor.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
    Ok(())
}
