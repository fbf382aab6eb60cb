//! Datastore
//!
//! The value returned by initialization: the write-once schema registry, the
//! connection pool and the default namespace. Models, native queries and
//! transactions are all reached from here; there is no global state.

use std::sync::Arc;

use indexmap::IndexMap;
use log::info;
use serde_json::Value;

use crate::error::OrmError;
use crate::model::Model;
use crate::pool::{ConnectionPool, DatabaseConfig, DbPool};
use crate::query::deferred::{DeferredQuery, Raw};
use crate::schema::{RawAttribute, RawModel, Registry};
use crate::transaction::{self, IsolationLevel, Transaction};

/// Namespace used when neither the configuration nor `meta` selects one
pub const DEFAULT_NAMESPACE: &str = "public";

struct Shared {
    registry: Registry,
    pool: Arc<dyn ConnectionPool>,
    default_namespace: String,
}

/// Registered models over one connection pool
///
/// Cloning is cheap; clones share the registry and the pool.
///
/// # Examples
///
/// ```no_run
/// use indexmap::IndexMap;
/// use keelson::{Datastore, DatabaseConfig, OrmError, RawModel};
/// use serde_json::json;
///
/// # fn main() -> Result<(), OrmError> {
/// let models: IndexMap<String, RawModel> = serde_json::from_value(json!({
///     "User": { "attributes": {
///         "id": { "type": "number", "autoIncrement": true },
///         "name": { "type": "string" }
///     }}
/// }))
/// .map_err(|e| OrmError::Parse(e.to_string()))?;
///
/// let datastore = Datastore::connect(&DatabaseConfig::load()?, &models, &IndexMap::new())?;
/// let users = datastore.model("user")?;
/// users.create(json!({ "name": "alice" }))?.exec()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("models", &self.inner.registry.len())
            .field("default_namespace", &self.inner.default_namespace)
            .finish()
    }
}

impl Datastore {
    /// Datastore over `pool` using the `public` namespace
    pub fn new(registry: Registry, pool: Arc<dyn ConnectionPool>) -> Self {
        Self::with_namespace(registry, pool, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(
        registry: Registry,
        pool: Arc<dyn ConnectionPool>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                registry,
                pool,
                default_namespace: default_namespace.into(),
            }),
        }
    }

    /// Normalize `models` and bind them to `pool`
    ///
    /// # Arguments
    ///
    /// * `models` - Entity name to raw attribute map
    /// * `default_attributes` - Attributes merged into every entity; the entity's own win
    /// * `pool` - Pool every deferred query acquires from
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when two entity names collide.
    pub fn initialize(
        models: &IndexMap<String, RawModel>,
        default_attributes: &IndexMap<String, RawAttribute>,
        pool: Arc<dyn ConnectionPool>,
    ) -> Result<Self, OrmError> {
        let registry = Registry::new(models, default_attributes)?;
        info!("registered {} model(s)", registry.len());
        Ok(Self::new(registry, pool))
    }

    /// Like [`Datastore::initialize`] with a [`DbPool`] built from `config`
    ///
    /// The configured `schema_name` becomes the default namespace.
    pub fn connect(
        config: &DatabaseConfig,
        models: &IndexMap<String, RawModel>,
        default_attributes: &IndexMap<String, RawAttribute>,
    ) -> Result<Self, OrmError> {
        let registry = Registry::new(models, default_attributes)?;
        let pool = Arc::new(DbPool::new(config)?);
        info!(
            "registered {} model(s), default namespace {}",
            registry.len(),
            config.schema_name
        );
        Ok(Self::with_namespace(registry, pool, config.schema_name.clone()))
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn pool(&self) -> &dyn ConnectionPool {
        self.inner.pool.as_ref()
    }

    pub fn default_namespace(&self) -> &str {
        &self.inner.default_namespace
    }

    /// Model registered under `name`, matched case-insensitively
    pub fn model(&self, name: &str) -> Result<Model, OrmError> {
        let schema = self.inner.registry.require(name)?;
        Ok(Model::new(self.clone(), Arc::clone(schema)))
    }

    /// Every registered model keyed by its declared name
    pub fn models(&self) -> IndexMap<String, Model> {
        self.inner
            .registry
            .iter()
            .map(|schema| {
                (
                    schema.global_id().to_string(),
                    Model::new(self.clone(), Arc::clone(schema)),
                )
            })
            .collect()
    }

    /// A caller-written statement with `$n` placeholders
    ///
    /// Rows are returned as the driver produced them, without schema coercion.
    pub fn send_native_query(&self, sql: impl Into<String>, args: Vec<Value>) -> DeferredQuery<'static, Raw> {
        DeferredQuery::native(self.clone(), sql.into(), args)
    }

    /// Run `f` between `BEGIN` and `COMMIT` on one pooled connection
    ///
    /// Queries join the transaction with `using_connection(tx)`. When `f` fails
    /// the transaction is rolled back and the error returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use keelson::{Datastore, OrmError};
    /// # use serde_json::json;
    /// # fn demo(datastore: &Datastore) -> Result<(), OrmError> {
    /// let accounts = datastore.model("account")?;
    /// datastore.transaction(|tx| {
    ///     accounts.update(json!(1))?.set(json!({ "balance": 90 }))?.using_connection(tx).exec()?;
    ///     accounts.update(json!(2))?.set(json!({ "balance": 110 }))?.using_connection(tx).exec()?;
    ///     Ok(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn transaction<T, F>(&self, f: F) -> Result<T, OrmError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, OrmError>,
    {
        transaction::run(self.pool(), None, f)
    }

    pub fn transaction_with_isolation<T, F>(&self, isolation_level: IsolationLevel, f: F) -> Result<T, OrmError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, OrmError>,
    {
        transaction::run(self.pool(), Some(isolation_level), f)
    }
}
