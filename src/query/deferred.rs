//! Deferred, chainable queries
//!
//! Entity operations return a [`DeferredQuery`]: nothing is compiled or sent until
//! [`DeferredQuery::exec`] is called. Modifiers that can be misused (`sort`,
//! `limit`, `meta`, `populate`) validate their input immediately and return a
//! `Result`, so configuration errors surface before any connection is touched.
//!
//! The type parameter fixes what `exec()` resolves to:
//!
//! | Mode | Output | `fetch()` |
//! |---|---|---|
//! | [`Exec`] | [`ExecResult`] | [`Many`] |
//! | [`ExecOne`] | [`ExecResult`] | [`One`] |
//! | [`Many`] | `Vec<Record>` | - |
//! | [`One`] | `Option<Record>` | - |
//! | [`Raw`] | [`QueryResult`] | appends `RETURNING *` |
//!
//! `exec()` consumes the query, so a value resolves at most once. Clones are
//! independent: each resolves on its own and gets its own statement timestamp.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::compile::{Limit, OrderBy};
use super::error_handling::{Interceptor, Interceptors, KnownError};
use super::plan::Statement;
use crate::datastore::Datastore;
use crate::error::{DbError, OrmError};
use crate::executor::{ExecResult, Executor, QueryResult};
use crate::relation::{eager, Populate};
use crate::schema::Schema;
use crate::value::{coerce_result_row, resolve_args, statement_timestamp, Arg, Record};

/// Result shape of a deferred query
pub trait Mode {
    type Output;

    fn collect(result: QueryResult) -> Self::Output;

    /// Output of a query that short-circuits without a statement
    fn empty() -> Self::Output {
        Self::collect(QueryResult::default())
    }
}

/// Write resolving to the affected-row count
#[derive(Debug)]
pub struct Exec;
/// Single-row write resolving to the affected-row count
#[derive(Debug)]
pub struct ExecOne;
/// Rows
#[derive(Debug)]
pub struct Many;
/// At most one row
#[derive(Debug)]
pub struct One;
/// Native statement resolving to the driver result
#[derive(Debug)]
pub struct Raw;

impl Mode for Exec {
    type Output = ExecResult;

    fn collect(result: QueryResult) -> ExecResult {
        ExecResult {
            rows_affected: result.rows_affected,
        }
    }
}

impl Mode for ExecOne {
    type Output = ExecResult;

    fn collect(result: QueryResult) -> ExecResult {
        ExecResult {
            rows_affected: result.rows_affected,
        }
    }
}

impl Mode for Many {
    type Output = Vec<Record>;

    fn collect(result: QueryResult) -> Vec<Record> {
        result.rows
    }
}

impl Mode for One {
    type Output = Option<Record>;

    fn collect(result: QueryResult) -> Option<Record> {
        result.rows.into_iter().next()
    }
}

impl Mode for Raw {
    type Output = QueryResult;

    fn collect(result: QueryResult) -> QueryResult {
        result
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Plan {
    Model(Statement),
    Native { sql: String, args: Vec<Arg> },
    /// Nothing to run. When rows are requested and a fallback read exists, it runs instead.
    Empty { fallback: Option<Statement> },
}

impl Plan {
    /// Whether ORDER BY and LIMIT can be appended: reads only, native statements
    /// are left to the caller
    fn accepts_ordering(&self) -> bool {
        match self {
            Plan::Model(statement) => !statement.writes(),
            Plan::Native { .. } => true,
            Plan::Empty { .. } => false,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct Meta {
    schema_name: Option<String>,
}

/// Namespace selected by a `meta` value; `schemaName` is the only recognised key
pub(crate) fn parse_meta(meta: Value) -> Result<Option<String>, OrmError> {
    serde_json::from_value::<Meta>(meta)
        .map(|meta| meta.schema_name)
        .map_err(|e| OrmError::config(format!("Unsupported meta: {e}")))
}

/// A database operation that runs when [`exec`](DeferredQuery::exec) is called
pub struct DeferredQuery<'c, M> {
    datastore: Datastore,
    schema: Option<Arc<Schema>>,
    plan: Plan,
    returning: bool,
    sort: Option<OrderBy>,
    limit: Option<Limit>,
    namespace: Option<String>,
    connection: Option<&'c dyn Executor>,
    populate: Option<Populate>,
    interceptors: Interceptors,
    mode: PhantomData<M>,
}

impl<M> Clone for DeferredQuery<'_, M> {
    fn clone(&self) -> Self {
        Self {
            datastore: self.datastore.clone(),
            schema: self.schema.clone(),
            plan: self.plan.clone(),
            returning: self.returning,
            sort: self.sort.clone(),
            limit: self.limit,
            namespace: self.namespace.clone(),
            connection: self.connection,
            populate: self.populate.clone(),
            interceptors: self.interceptors.clone(),
            mode: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for DeferredQuery<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQuery")
            .field("model", &self.schema.as_ref().map(|schema| schema.global_id()))
            .field("plan", &self.plan)
            .field("returning", &self.returning)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("namespace", &self.namespace)
            .field("pinned", &self.connection.is_some())
            .finish()
    }
}

impl<M> DeferredQuery<'static, M> {
    pub(crate) fn for_model(datastore: Datastore, schema: Arc<Schema>, plan: Plan) -> Self {
        Self {
            datastore,
            schema: Some(schema),
            plan,
            returning: false,
            sort: None,
            limit: None,
            namespace: None,
            connection: None,
            populate: None,
            interceptors: Interceptors::default(),
            mode: PhantomData,
        }
    }
}

impl DeferredQuery<'static, Raw> {
    pub(crate) fn native(datastore: Datastore, sql: String, args: Vec<Value>) -> Self {
        Self {
            datastore,
            schema: None,
            plan: Plan::Native {
                sql,
                args: args.into_iter().map(Arg::Value).collect(),
            },
            returning: false,
            sort: None,
            limit: None,
            namespace: None,
            connection: None,
            populate: None,
            interceptors: Interceptors::default(),
            mode: PhantomData,
        }
    }
}

impl<'c, M: Mode> DeferredQuery<'c, M> {
    fn convert<'a, N>(self, connection: Option<&'a dyn Executor>) -> DeferredQuery<'a, N> {
        DeferredQuery {
            datastore: self.datastore,
            schema: self.schema,
            plan: self.plan,
            returning: self.returning,
            sort: self.sort,
            limit: self.limit,
            namespace: self.namespace,
            connection,
            populate: self.populate,
            interceptors: self.interceptors,
            mode: PhantomData,
        }
    }

    pub(crate) fn with_returning(mut self) -> Self {
        self.returning = true;
        self
    }

    pub(crate) fn with_options(mut self, sort: Option<OrderBy>, limit: Option<Limit>) -> Self {
        self.sort = sort;
        self.limit = limit;
        self
    }

    pub(crate) fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    fn require_ordering(&self, modifier: &str) -> Result<(), OrmError> {
        if self.plan.accepts_ordering() {
            Ok(())
        } else {
            Err(OrmError::config(format!("{modifier}() cannot be used on a write")))
        }
    }

    /// Order by `"<column>"` or `"<column> ASC|DESC"`
    ///
    /// Only reads and native statements can be sorted.
    pub fn sort(mut self, clause: &str) -> Result<Self, OrmError> {
        self.require_ordering("sort")?;
        self.sort = Some(OrderBy::parse(clause)?);
        Ok(self)
    }

    /// Cap the number of rows; `n` must be a safe integer
    ///
    /// Only reads and native statements can be limited.
    pub fn limit(mut self, n: i64) -> Result<Self, OrmError> {
        self.require_ordering("limit")?;
        self.limit = Some(Limit::new(n)?);
        Ok(self)
    }

    /// Select the namespace the statement runs in: `{ "schemaName": "..." }`
    pub fn meta(mut self, meta: Value) -> Result<Self, OrmError> {
        if let Some(namespace) = parse_meta(meta)? {
            self.namespace = Some(namespace);
        }
        Ok(self)
    }

    /// Replace the foreign key `attribute` of every returned row with the referenced row
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when the attribute does not exist, is not a foreign
    /// key, or references an unknown model.
    pub fn populate(mut self, attribute: &str) -> Result<Self, OrmError> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| OrmError::config("populate() needs a model query"))?;
        self.populate = Some(Populate::resolve(self.datastore.registry(), schema, attribute)?);
        Ok(self)
    }

    /// Run on `connection` instead of a pooled connection
    ///
    /// The pool is not touched; the caller owns the connection's lifecycle.
    pub fn using_connection<'a>(self, connection: &'a dyn Executor) -> DeferredQuery<'a, M> {
        self.convert(Some(connection))
    }

    /// Reject with `value` when the database fails with one of `name`'s codes
    pub fn intercept(mut self, name: KnownError, value: impl Into<String>) -> Self {
        self.interceptors.register(name, Interceptor::Value(value.into()));
        self
    }

    /// Reject with `handler`'s output when the database fails with one of `name`'s codes
    pub fn intercept_with<F>(mut self, name: KnownError, handler: F) -> Self
    where
        F: Fn(&DbError) -> OrmError + Send + Sync + 'static,
    {
        self.interceptors.register(name, Interceptor::Handler(Arc::new(handler)));
        self
    }

    /// Compile, execute and post-process the query
    ///
    /// # Errors
    ///
    /// Returns the database error (or its intercepted replacement), a pool error
    /// when no connection can be acquired, or a parse error when a value cannot
    /// be converted.
    pub fn exec(self) -> Result<M::Output, OrmError> {
        let Some((sql, args)) = self.render()? else {
            return Ok(M::empty());
        };

        // one timestamp for every placeholder of this statement
        let params = resolve_args(&args, statement_timestamp());

        let result = match self.connection {
            Some(connection) => self.run(connection, &sql, &params)?,
            None => {
                let pool = self.datastore.pool();
                let connection = pool.acquire()?;
                self.run(connection.as_ref(), &sql, &params)?
            }
        };
        Ok(M::collect(result))
    }

    fn schema(&self) -> Result<&Schema, OrmError> {
        self.schema
            .as_deref()
            .ok_or_else(|| OrmError::config("statement has no model"))
    }

    fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .unwrap_or_else(|| self.datastore.default_namespace())
    }

    /// Final SQL text and arguments, or `None` when nothing needs to run
    fn render(&self) -> Result<Option<(String, Vec<Arg>)>, OrmError> {
        let (mut sql, args, writes) = match &self.plan {
            Plan::Model(statement) => {
                let (sql, args) = statement.render(self.schema()?, self.namespace())?;
                (sql, args, statement.writes())
            }
            Plan::Native { sql, args } => (sql.clone(), args.clone(), true),
            Plan::Empty {
                fallback: Some(read),
            } if self.returning => {
                let (sql, args) = read.render(self.schema()?, self.namespace())?;
                (sql, args, false)
            }
            Plan::Empty { .. } => return Ok(None),
        };

        if let Some(sort) = &self.sort {
            sql.push_str(&sort.to_sql());
        }
        if let Some(limit) = self.limit {
            sql.push_str(&limit.to_sql());
        }
        if self.returning && writes {
            sql.push_str(" RETURNING *");
        }
        Ok(Some((sql, args)))
    }

    fn run(&self, connection: &dyn Executor, sql: &str, params: &[Value]) -> Result<QueryResult, OrmError> {
        let mut result = connection
            .query(sql, params)
            .map_err(|e| self.interceptors.remap(e))?;

        if let Some(schema) = &self.schema {
            result.rows = result
                .rows
                .into_iter()
                .map(|row| coerce_result_row(schema, row))
                .collect();
        }
        if let Some(populate) = &self.populate {
            eager::populate(connection, self.namespace(), populate, &mut result.rows)?;
        }
        Ok(result)
    }
}

impl<'c> DeferredQuery<'c, Exec> {
    /// Resolve to the affected rows instead of their count
    pub fn fetch(self) -> DeferredQuery<'c, Many> {
        let connection = self.connection;
        self.with_returning().convert(connection)
    }
}

impl<'c> DeferredQuery<'c, ExecOne> {
    /// Resolve to the affected row instead of the count
    pub fn fetch(self) -> DeferredQuery<'c, One> {
        let connection = self.connection;
        self.with_returning().convert(connection)
    }
}

impl<'c> DeferredQuery<'c, Raw> {
    /// Append `RETURNING *` to the native statement
    pub fn fetch(self) -> Self {
        self.with_returning()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockPool};
    use crate::tests_cfg;
    use serde_json::json;

    fn datastore() -> (Datastore, Arc<MockPool>) {
        let pool = Arc::new(MockPool::new());
        (Datastore::new(tests_cfg::registry(), pool.clone()), pool)
    }

    fn rows(value: Value) -> QueryResult {
        let rows = value
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_object().cloned().unwrap())
            .collect();
        QueryResult::from_rows(rows)
    }

    #[test]
    fn test_find_sort_limit_sql() {
        let (datastore, pool) = datastore();
        pool.executor().push_result(rows(json!([{ "id": 2, "name": "bob" }])));

        let found = datastore
            .model("Simple")
            .unwrap()
            .find(Value::Null)
            .unwrap()
            .sort("name DESC")
            .unwrap()
            .limit(1)
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(Value::Object(found[0].clone()), json!({ "id": 2, "name": "bob" }));
        assert_eq!(
            pool.executor().statements(),
            vec![r#"SELECT * FROM "public"."simple" ORDER BY "name" DESC LIMIT 1"#.to_string()]
        );
        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.released(), 1);
    }

    #[test]
    fn test_configuration_errors_never_touch_the_pool() {
        let (datastore, pool) = datastore();
        let simple = datastore.model("simple").unwrap();

        assert!(simple.find(Value::Null).unwrap().sort("name up").is_err());
        assert!(simple.find(Value::Null).unwrap().limit(1 << 60).is_err());
        assert!(simple.find(Value::Null).unwrap().meta(json!({ "bogus": 1 })).is_err());
        assert!(simple.find(Value::Null).unwrap().populate("name").is_err());
        assert!(simple.find(json!({ "name": { "~": "x" } })).is_err());
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_sort_and_limit_rejected_on_writes() {
        let (datastore, pool) = datastore();
        let simple = datastore.model("simple").unwrap();

        let err = simple.destroy(Value::Null).unwrap().sort("name").unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
        let err = simple
            .update(Value::Null)
            .unwrap()
            .set(json!({ "name": "x" }))
            .unwrap()
            .limit(1)
            .unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
        assert!(simple.create(json!({ "name": "x" })).unwrap().fetch().limit(1).is_err());
        // nothing to set still counts as an update
        assert!(simple.update(Value::Null).unwrap().set(json!({})).unwrap().fetch().sort("name").is_err());
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_meta_selects_namespace() {
        let (datastore, pool) = datastore();
        datastore
            .model("simple")
            .unwrap()
            .find(json!({ "name": "x" }))
            .unwrap()
            .meta(json!({ "schemaName": "tenant_1" }))
            .unwrap()
            .exec()
            .unwrap();
        assert_eq!(
            pool.executor().statements(),
            vec![r#"SELECT * FROM "tenant_1"."simple" WHERE "name" = $1"#.to_string()]
        );
    }

    #[test]
    fn test_using_connection_skips_the_pool() {
        let (datastore, pool) = datastore();
        let connection = MockExecutor::new();

        datastore
            .model("simple")
            .unwrap()
            .destroy(json!(3))
            .unwrap()
            .using_connection(&connection)
            .exec()
            .unwrap();

        assert_eq!(pool.acquired(), 0);
        assert_eq!(
            connection.statements(),
            vec![r#"DELETE FROM "public"."simple" WHERE "id" = $1"#.to_string()]
        );
    }

    #[test]
    fn test_connection_released_on_failure() {
        let (datastore, pool) = datastore();
        pool.executor()
            .push_error(DbError::new(Some("42P01"), "relation does not exist"));

        let err = datastore
            .model("simple")
            .unwrap()
            .find(Value::Null)
            .unwrap()
            .exec()
            .unwrap_err();
        assert_eq!(err.code(), Some("42P01"));
        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.released(), 1);
    }

    #[test]
    fn test_intercept_remaps_only_mapped_codes() {
        let (datastore, pool) = datastore();
        let simple = datastore.model("simple").unwrap();

        pool.executor().push_error(DbError::new(Some("23505"), "duplicate key"));
        let err = simple
            .create(json!({ "name": "a" }))
            .unwrap()
            .intercept(KnownError::Unique, "name already taken")
            .exec()
            .unwrap_err();
        assert_eq!(err, OrmError::Intercepted("name already taken".to_string()));

        pool.executor().push_error(DbError::new(Some("23502"), "not null violation"));
        let err = simple
            .create(json!({ "name": "a" }))
            .unwrap()
            .intercept(KnownError::Unique, "name already taken")
            .exec()
            .unwrap_err();
        assert_eq!(err.code(), Some("23502"));
    }

    #[test]
    fn test_intercept_with_function() {
        let (datastore, pool) = datastore();
        pool.executor().push_error(DbError::new(Some("23505"), "duplicate key"));

        let err = datastore
            .model("simple")
            .unwrap()
            .create(json!({ "name": "a" }))
            .unwrap()
            .intercept_with(KnownError::Unique, |raw| OrmError::Validation {
                attribute: "name".to_string(),
                message: raw.message.clone(),
            })
            .exec()
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation { message, .. } if message == "duplicate key"));
    }

    #[test]
    fn test_statement_timestamp_shared_within_statement() {
        let (datastore, pool) = datastore();
        datastore
            .model("audited")
            .unwrap()
            .create_each(vec![json!({ "name": "a" }), json!({ "name": "b" })])
            .unwrap()
            .exec()
            .unwrap();

        let params = pool.executor().params();
        let params = &params[0];
        // name, created_at, updated_at per row
        assert_eq!(params.len(), 6);
        let stamp = &params[1];
        assert!(stamp.is_i64());
        for idx in [1, 2, 4, 5] {
            assert_eq!(&params[idx], stamp);
        }
    }

    #[test]
    fn test_clones_resolve_independently() {
        let (datastore, pool) = datastore();
        let query = datastore.model("simple").unwrap().find(json!({ "name": "a" })).unwrap();

        let again = query.clone();
        query.exec().unwrap();
        again.exec().unwrap();

        let statements = pool.executor().statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], statements[1]);
        assert_eq!(pool.acquired(), 2);
    }

    #[test]
    fn test_native_query_fetch_appends_returning() {
        let (datastore, pool) = datastore();
        pool.executor().push_result(rows(json!([{ "id": 1 }])));

        let result = datastore
            .send_native_query("DELETE FROM simple WHERE id = $1", vec![json!(1)])
            .fetch()
            .exec()
            .unwrap();

        assert_eq!(result.rows_affected, 1);
        assert_eq!(
            pool.executor().statements(),
            vec!["DELETE FROM simple WHERE id = $1 RETURNING *".to_string()]
        );
        assert_eq!(pool.executor().params(), vec![vec![json!(1)]]);
    }

    #[test]
    fn test_native_query_rejects_populate() {
        let (datastore, _pool) = datastore();
        let err = datastore
            .send_native_query("SELECT 1", vec![])
            .populate("my_simple")
            .unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn test_rows_are_coerced() {
        let (datastore, pool) = datastore();
        pool.executor().push_result(rows(json!([
            { "id": "7", "str_no_def": null, "str_def": "x", "num_no_def": null, "num_def": "5" }
        ])));

        let row = datastore
            .model("withdefaults")
            .unwrap()
            .find_one(json!(7))
            .unwrap()
            .exec()
            .unwrap()
            .unwrap();
        assert_eq!(
            Value::Object(row),
            json!({ "id": 7, "str_no_def": "", "str_def": "x", "num_no_def": 0, "num_def": 5 })
        );
    }
}
