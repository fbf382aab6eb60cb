//! # Keelson
//!
//! Criteria-to-SQL compiler and deferred query executor for PostgreSQL on the
//! `may` coroutine runtime.
//!
//! Models are declared as attribute maps, normalized once into a [`Registry`]
//! and bound to a connection pool in a [`Datastore`]. Model operations compile
//! criteria objects into parameterized SQL and return a [`DeferredQuery`] that
//! runs when [`exec`](DeferredQuery::exec) is called, over a pooled connection or
//! a caller-supplied one such as a [`Transaction`].
//!
//! ```no_run
//! use indexmap::IndexMap;
//! use keelson::{Datastore, DatabaseConfig, OrmError, RawModel};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), OrmError> {
//! let models: IndexMap<String, RawModel> = serde_json::from_value(json!({
//!     "Simple": { "attributes": {
//!         "id": { "type": "number", "autoIncrement": true },
//!         "name": { "type": "string" }
//!     }}
//! }))
//! .map_err(|e| OrmError::Parse(e.to_string()))?;
//!
//! let datastore = Datastore::connect(&DatabaseConfig::load()?, &models, &IndexMap::new())?;
//! let simple = datastore.model("simple")?;
//!
//! simple.create_each(vec![json!({ "name": "alice" }), json!({ "name": "bob" })])?.exec()?;
//! let last = simple.find(json!({}))?.sort("name DESC")?.limit(1)?.exec()?;
//! assert_eq!(last[0]["name"], "bob");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod query;
pub mod relation;
pub mod schema;
pub mod transaction;
pub mod value;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
#[cfg(test)]
mod tests_cfg;

pub use connection::{connect, ConnectionError, ConnectionFormat};
pub use datastore::{Datastore, DEFAULT_NAMESPACE};
pub use error::{DbError, OrmError};
pub use executor::{ExecResult, Executor, PgExecutor, QueryResult};
pub use model::{Model, PendingUpdate, PendingUpdateOne};
pub use pool::{ConnectionPool, DatabaseConfig, DbPool, PooledConnection};
pub use query::{DeferredQuery, Exec, ExecOne, KnownError, Many, Mode, One, Raw};
pub use schema::{AttributeDef, AttributeType, RawAttribute, RawModel, Registry, Schema};
pub use transaction::{IsolationLevel, Transaction};
pub use value::Record;
