//! Model operations
//!
//! A [`Model`] is the handle for one registered entity. Every operation parses
//! and validates its input immediately and returns a [`DeferredQuery`]; nothing
//! touches the database until that query is executed.
//!
//! # Examples
//!
//! ```no_run
//! use keelson::{Datastore, OrmError};
//! use serde_json::json;
//!
//! # fn demo(datastore: &Datastore) -> Result<(), OrmError> {
//! let users = datastore.model("user")?;
//!
//! let alice = users.create(json!({ "name": "alice" }))?.fetch().exec()?;
//! let newest = users.find(json!({ "sort": "id DESC", "limit": 10 }))?.exec()?;
//! let renamed = users.update_one(json!({ "name": "alice" }))?.set(json!({ "name": "alicia" }))?.exec()?;
//! users.destroy(json!({ "name": { "!=": null } }))?.exec()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::datastore::Datastore;
use crate::error::OrmError;
use crate::query::criteria::{Criteria, FindOptions};
use crate::query::deferred::{parse_meta, DeferredQuery, Exec, ExecOne, Many, Mode, One, Plan};
use crate::query::plan::Statement;
use crate::schema::Schema;
use crate::value::{compute_defaults, validate_properties, without_unrecognised, Props, Record};

/// Handle for one registered entity
#[derive(Clone)]
pub struct Model {
    datastore: Datastore,
    schema: Arc<Schema>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("global_id", &self.schema.global_id())
            .finish()
    }
}

fn props_object(props: &Value) -> Result<&Record, OrmError> {
    props
        .as_object()
        .ok_or_else(|| OrmError::config(format!("Expected an object of attributes, got {props}")))
}

impl Model {
    pub(crate) fn new(datastore: Datastore, schema: Arc<Schema>) -> Self {
        Self { datastore, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Declared entity name
    pub fn global_id(&self) -> &str {
        self.schema.global_id()
    }

    fn query<M>(&self, plan: Plan) -> DeferredQuery<'static, M> {
        DeferredQuery::for_model(self.datastore.clone(), Arc::clone(&self.schema), plan)
    }

    /// Recognised, validated attributes with defaults applied
    fn write_props(&self, props: &Value, creating: bool) -> Result<Props, OrmError> {
        let props = without_unrecognised(&self.schema, props_object(props)?);
        validate_properties(&self.schema, &props)?;
        Ok(compute_defaults(&self.schema, &props, creating))
    }

    /// Insert one row
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when `props` is not an object and
    /// `OrmError::Validation` when a value is outside its allowed set.
    pub fn create(&self, props: Value) -> Result<DeferredQuery<'static, ExecOne>, OrmError> {
        let row = self.write_props(&props, true)?;
        Ok(self.query(Plan::Model(Statement::Insert { rows: vec![row] })))
    }

    /// Insert several rows in one statement
    ///
    /// An empty list resolves without acquiring a connection.
    pub fn create_each(&self, props: Vec<Value>) -> Result<DeferredQuery<'static, Exec>, OrmError> {
        if props.is_empty() {
            return Ok(self.query(Plan::Empty { fallback: None }));
        }
        let rows = props
            .iter()
            .map(|props| self.write_props(props, true))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.query(Plan::Model(Statement::Insert { rows })))
    }

    /// Rows matching `options`: bare criteria or `{ select, where, sort, limit }`
    pub fn find(&self, options: Value) -> Result<DeferredQuery<'static, Many>, OrmError> {
        self.select(&options, false)
    }

    /// The single row matching `options`
    ///
    /// Resolves to `None` when nothing matches; fails with the database's
    /// cardinality violation when more than one row matches.
    pub fn find_one(&self, options: Value) -> Result<DeferredQuery<'static, One>, OrmError> {
        self.select(&options, true)
    }

    fn select<M: Mode>(
        &self,
        options: &Value,
        single: bool,
    ) -> Result<DeferredQuery<'static, M>, OrmError> {
        let options = FindOptions::parse(&self.schema, options)?;
        let plan = Plan::Model(Statement::Select {
            columns: options.select,
            criteria: options.criteria,
            single,
        });
        Ok(self.query(plan).with_options(options.sort, options.limit))
    }

    /// Start an update of every row matching `criteria`
    pub fn update(&self, criteria: Value) -> Result<PendingUpdate, OrmError> {
        Ok(PendingUpdate {
            model: self.clone(),
            criteria: Criteria::parse(&self.schema, &criteria)?,
            namespace: None,
        })
    }

    /// Start an update of the single row matching `criteria`
    pub fn update_one(&self, criteria: Value) -> Result<PendingUpdateOne, OrmError> {
        Ok(PendingUpdateOne {
            inner: self.update(criteria)?,
        })
    }

    /// Delete rows matching `options`
    ///
    /// # Errors
    ///
    /// Returns `OrmError::Config` when `options` carries a `select`.
    pub fn destroy(&self, options: Value) -> Result<DeferredQuery<'static, Exec>, OrmError> {
        self.delete(&options, false)
    }

    /// Delete the single row matching `options`
    pub fn destroy_one(&self, options: Value) -> Result<DeferredQuery<'static, ExecOne>, OrmError> {
        self.delete(&options, true)
    }

    fn delete<M: Mode>(
        &self,
        options: &Value,
        single: bool,
    ) -> Result<DeferredQuery<'static, M>, OrmError> {
        let options = FindOptions::parse(&self.schema, options)?;
        if options.select.is_some() {
            return Err(OrmError::config("Cannot understand use of select in a destroy() call"));
        }
        let plan = Plan::Model(Statement::Delete {
            criteria: options.criteria,
            single,
        });
        Ok(self.query(plan).with_options(options.sort, options.limit))
    }
}

/// An update waiting for its `set`
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    model: Model,
    criteria: Criteria,
    namespace: Option<String>,
}

impl PendingUpdate {
    /// Select the namespace the update runs in: `{ "schemaName": "..." }`
    pub fn meta(mut self, meta: Value) -> Result<Self, OrmError> {
        if let Some(namespace) = parse_meta(meta)? {
            self.namespace = Some(namespace);
        }
        Ok(self)
    }

    fn assignments(&self, props: &Value) -> Result<Props, OrmError> {
        self.model.write_props(props, false)
    }

    /// Columns to assign
    ///
    /// With nothing to assign the query resolves without a statement, or runs the
    /// equivalent read once `fetch()` is chained.
    pub fn set(self, props: Value) -> Result<DeferredQuery<'static, Exec>, OrmError> {
        let set = self.assignments(&props)?;
        let plan = if set.is_empty() {
            Plan::Empty {
                fallback: Some(Statement::Select {
                    columns: None,
                    criteria: self.criteria,
                    single: false,
                }),
            }
        } else {
            Plan::Model(Statement::Update {
                set,
                criteria: self.criteria,
                single: false,
            })
        };
        Ok(self.model.query(plan).with_namespace(self.namespace))
    }
}

/// A single-row update waiting for its `set`
#[derive(Debug, Clone)]
pub struct PendingUpdateOne {
    inner: PendingUpdate,
}

impl PendingUpdateOne {
    pub fn meta(self, meta: Value) -> Result<Self, OrmError> {
        Ok(Self {
            inner: self.inner.meta(meta)?,
        })
    }

    /// Columns to assign; resolves to the updated row
    ///
    /// With nothing to assign this is a `find_one` on the same criteria.
    pub fn set(self, props: Value) -> Result<DeferredQuery<'static, One>, OrmError> {
        let PendingUpdate {
            model,
            criteria,
            namespace,
        } = self.inner;
        let set = model.write_props(&props, false)?;
        let statement = if set.is_empty() {
            Statement::Select {
                columns: None,
                criteria,
                single: true,
            }
        } else {
            Statement::Update {
                set,
                criteria,
                single: true,
            }
        };
        Ok(model
            .query(Plan::Model(statement))
            .with_returning()
            .with_namespace(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryResult;
    use crate::mock::MockPool;
    use crate::tests_cfg;
    use serde_json::json;

    fn datastore() -> (Datastore, Arc<MockPool>) {
        let pool = Arc::new(MockPool::new());
        (Datastore::new(tests_cfg::registry(), pool.clone()), pool)
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_fetch_returns_row() {
        let (datastore, pool) = datastore();
        pool.executor()
            .push_result(QueryResult::from_rows(vec![record(json!({ "id": 1, "name": "alice" }))]));

        let created = datastore
            .model("simple")
            .unwrap()
            .create(json!({ "name": "alice", "unknown": true }))
            .unwrap()
            .fetch()
            .exec()
            .unwrap();

        assert_eq!(created, Some(record(json!({ "id": 1, "name": "alice" }))));
        assert_eq!(
            pool.executor().statements(),
            vec![r#"INSERT INTO "public"."simple" ("name") VALUES ($1) RETURNING *"#.to_string()]
        );
    }

    #[test]
    fn test_create_without_fetch_returns_count() {
        let (datastore, pool) = datastore();
        pool.executor().push_result(QueryResult::affected(1));

        let result = datastore
            .model("simple")
            .unwrap()
            .create(json!({ "name": "bob" }))
            .unwrap()
            .exec()
            .unwrap();
        assert_eq!(result.rows_affected, 1);
    }

    #[test]
    fn test_create_applies_defaults() {
        let (datastore, pool) = datastore();
        datastore
            .model("withdefaults")
            .unwrap()
            .create(json!({}))
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(
            pool.executor().statements(),
            vec![
                r#"INSERT INTO "public"."withdefaults" ("str_no_def", "str_def", "num_no_def", "num_def") VALUES ($1, $2, $3, $4)"#
                    .to_string()
            ]
        );
        assert_eq!(pool.executor().params(), vec![vec![json!(""), json!("val"), json!(0), json!(77)]]);
    }

    #[test]
    fn test_create_rejects_disallowed_value() {
        let (datastore, pool) = datastore();
        let err = datastore
            .model("withcolour")
            .unwrap()
            .create(json!({ "colour": "purple" }))
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation { attribute, .. } if attribute == "colour"));
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_create_rejects_non_object() {
        let (datastore, _pool) = datastore();
        let err = datastore.model("simple").unwrap().create(json!([1, 2])).unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn test_create_each_empty_short_circuits() {
        let (datastore, pool) = datastore();
        let simple = datastore.model("simple").unwrap();

        assert_eq!(simple.create_each(vec![]).unwrap().exec().unwrap().rows_affected, 0);
        assert!(simple.create_each(vec![]).unwrap().fetch().exec().unwrap().is_empty());
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_find_one_uses_single_row_subquery() {
        let (datastore, pool) = datastore();
        let found = datastore
            .model("simple")
            .unwrap()
            .find_one(json!({ "name": "nobody" }))
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(found, None);
        assert_eq!(
            pool.executor().statements(),
            vec![
                r#"SELECT * FROM "public"."simple" WHERE "id" = (SELECT "id" FROM "public"."simple" WHERE "name" = $1)"#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_find_options_form() {
        let (datastore, pool) = datastore();
        datastore
            .model("simple")
            .unwrap()
            .find(json!({ "select": ["name"], "where": { "id": { ">": 3 } }, "sort": "id DESC", "limit": 2 }))
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(
            pool.executor().statements(),
            vec![r#"SELECT "name" FROM "public"."simple" WHERE "id" > $1 ORDER BY "id" DESC LIMIT 2"#.to_string()]
        );
        assert_eq!(pool.executor().params(), vec![vec![json!(3)]]);
    }

    #[test]
    fn test_update_set_and_fetch() {
        let (datastore, pool) = datastore();
        datastore
            .model("simple")
            .unwrap()
            .update(json!({}))
            .unwrap()
            .set(json!({ "name": "x" }))
            .unwrap()
            .fetch()
            .exec()
            .unwrap();

        assert_eq!(
            pool.executor().statements(),
            vec![r#"UPDATE "public"."simple" SET "name" = $1 RETURNING *"#.to_string()]
        );
    }

    #[test]
    fn test_update_with_nothing_to_set() {
        let (datastore, pool) = datastore();
        let simple = datastore.model("simple").unwrap();

        let result = simple.update(json!(-1)).unwrap().set(json!({})).unwrap().exec().unwrap();
        assert_eq!(result.rows_affected, 0);
        assert_eq!(pool.acquired(), 0);

        simple
            .update(json!(-1))
            .unwrap()
            .set(json!({}))
            .unwrap()
            .fetch()
            .exec()
            .unwrap();
        assert_eq!(
            pool.executor().statements(),
            vec![r#"SELECT * FROM "public"."simple" WHERE "id" = $1"#.to_string()]
        );
    }

    #[test]
    fn test_update_sets_updated_at() {
        let (datastore, pool) = datastore();
        datastore
            .model("audited")
            .unwrap()
            .update(json!(4))
            .unwrap()
            .set(json!({ "name": "y" }))
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(
            pool.executor().statements(),
            vec![r#"UPDATE "public"."audited" SET "name" = $1, "updated_at" = $2 WHERE "id" = $3"#.to_string()]
        );
        let params = &pool.executor().params()[0];
        assert!(params[1].is_i64());
    }

    #[test]
    fn test_update_meta_before_set() {
        let (datastore, pool) = datastore();
        datastore
            .model("simple")
            .unwrap()
            .update(json!(1))
            .unwrap()
            .meta(json!({ "schemaName": "tenant" }))
            .unwrap()
            .set(json!({ "name": "z" }))
            .unwrap()
            .exec()
            .unwrap();
        assert_eq!(
            pool.executor().statements(),
            vec![r#"UPDATE "tenant"."simple" SET "name" = $1 WHERE "id" = $2"#.to_string()]
        );
    }

    #[test]
    fn test_update_one_returns_row() {
        let (datastore, pool) = datastore();
        pool.executor()
            .push_result(QueryResult::from_rows(vec![record(json!({ "id": 1, "name": "z" }))]));

        let updated = datastore
            .model("simple")
            .unwrap()
            .update_one(json!({ "name": "a" }))
            .unwrap()
            .set(json!({ "name": "z" }))
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(updated, Some(record(json!({ "id": 1, "name": "z" }))));
        assert_eq!(
            pool.executor().statements(),
            vec![
                r#"UPDATE "public"."simple" SET "name" = $1 WHERE "id" = (SELECT "id" FROM "public"."simple" WHERE "name" = $2) RETURNING *"#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_update_one_with_nothing_to_set_reads() {
        let (datastore, pool) = datastore();
        datastore
            .model("simple")
            .unwrap()
            .update_one(json!({ "name": "a" }))
            .unwrap()
            .set(json!({ "unknown": 1 }))
            .unwrap()
            .exec()
            .unwrap();
        assert_eq!(
            pool.executor().statements(),
            vec![
                r#"SELECT * FROM "public"."simple" WHERE "id" = (SELECT "id" FROM "public"."simple" WHERE "name" = $1)"#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_destroy_rejects_select() {
        let (datastore, pool) = datastore();
        let err = datastore
            .model("simple")
            .unwrap()
            .destroy(json!({ "select": ["name"], "where": { "name": "a" } }))
            .unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
        assert_eq!(pool.acquired(), 0);
    }

    #[test]
    fn test_destroy_one_ambiguity_surfaces() {
        let (datastore, pool) = datastore();
        pool.executor()
            .push_error(crate::error::DbError::new(Some("21000"), "more than one row returned by a subquery"));

        let err = datastore
            .model("simple")
            .unwrap()
            .destroy_one(json!({ "name": "dup" }))
            .unwrap()
            .exec()
            .unwrap_err();
        assert!(err.is_ambiguity());
        assert_eq!(
            pool.executor().statements(),
            vec![
                r#"DELETE FROM "public"."simple" WHERE "id" = (SELECT "id" FROM "public"."simple" WHERE "name" = $1)"#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_find_populate_runs_follow_up_on_same_lease() {
        let (datastore, pool) = datastore();
        pool.executor().push_result(QueryResult::from_rows(vec![
            record(json!({ "id": 1, "name": "a", "my_simple": 3, "my_with_defaults": null })),
            record(json!({ "id": 2, "name": "b", "my_simple": null, "my_with_defaults": null })),
        ]));
        pool.executor()
            .push_result(QueryResult::from_rows(vec![record(json!({ "id": 3, "name": "s" }))]));

        let rows = datastore
            .model("withrelationships")
            .unwrap()
            .find(Value::Null)
            .unwrap()
            .populate("my_simple")
            .unwrap()
            .exec()
            .unwrap();

        assert_eq!(rows[0]["my_simple"], json!({ "id": 3, "name": "s" }));
        assert_eq!(rows[1]["my_simple"], Value::Null);
        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.executor().statements().len(), 2);
    }
}
