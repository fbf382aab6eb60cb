//! Eager loading of foreign keys
//!
//! After the main statement resolves, the distinct non-null foreign key values are
//! collected and the referenced rows are loaded with one follow-up query on the
//! same connection and in the same namespace:
//!
//! - one main row: `SELECT * FROM ns.related WHERE "id" = $1`
//! - several rows: `SELECT * FROM ns.related WHERE "id" = ANY($1)`
//!
//! Each foreign key is then replaced with its row. A null key stays null and a
//! key with no matching row becomes null. Attached rows have declared defaults
//! applied to null columns, then the usual result coercion.

use std::collections::HashMap;

use log::debug;
use serde_json::Value;

use super::Populate;
use crate::error::OrmError;
use crate::executor::Executor;
use crate::query::compile::{qualified_table, quote_ident};
use crate::value::{apply_read_defaults, coerce_result_row, Record};

/// Key used to pair a foreign key with a related row's id
///
/// Ids read back as text (`BIGINT`, `NUMERIC`) must still match numeric keys.
fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Replace `populate.attribute` of every row with the row it references
///
/// # Errors
///
/// Returns the error of the follow-up query.
pub fn populate(
    executor: &dyn Executor,
    namespace: &str,
    populate: &Populate,
    rows: &mut [Record],
) -> Result<(), OrmError> {
    let mut seen = Vec::new();
    let mut ids = Vec::new();
    for value in rows.iter().filter_map(|row| row.get(&populate.attribute)) {
        if let Some(key) = id_key(value) {
            if !seen.contains(&key) {
                seen.push(key);
                ids.push(value.clone());
            }
        }
    }
    if ids.is_empty() {
        return Ok(());
    }

    let table = qualified_table(namespace, populate.related.table_name());
    let id = quote_ident("id");
    let related = if rows.len() == 1 {
        executor.query(&format!("SELECT * FROM {table} WHERE {id} = $1"), &ids[..1])?
    } else {
        executor.query(
            &format!("SELECT * FROM {table} WHERE {id} = ANY($1)"),
            &[Value::Array(ids)],
        )?
    };
    debug!(
        "populated {} from {} related row(s)",
        populate.attribute,
        related.rows.len()
    );

    let mut by_id = HashMap::new();
    for row in related.rows {
        let row = coerce_result_row(&populate.related, apply_read_defaults(&populate.related, row));
        if let Some(key) = row.get("id").and_then(id_key) {
            by_id.insert(key, row);
        }
    }

    for row in rows.iter_mut() {
        if let Some(value) = row.get_mut(&populate.attribute) {
            if let Some(key) = id_key(value) {
                *value = by_id
                    .get(&key)
                    .cloned()
                    .map(Value::Object)
                    .unwrap_or(Value::Null);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryResult;
    use crate::mock::MockExecutor;
    use crate::tests_cfg;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn populate_simple() -> Populate {
        let registry = tests_cfg::registry();
        let schema = registry.require("withrelationships").unwrap();
        Populate::resolve(&registry, schema, "my_simple").unwrap()
    }

    #[test]
    fn test_single_row_uses_equality() {
        let executor = MockExecutor::new();
        executor.push_result(QueryResult::from_rows(vec![record(json!({ "id": 4, "name": "s" }))]));

        let mut rows = vec![record(json!({ "id": 1, "my_simple": 4 }))];
        populate(&executor, "public", &populate_simple(), &mut rows).unwrap();

        assert_eq!(rows[0]["my_simple"], json!({ "id": 4, "name": "s" }));
        assert_eq!(
            executor.statements(),
            vec![r#"SELECT * FROM "public"."simple" WHERE "id" = $1"#.to_string()]
        );
        assert_eq!(executor.params(), vec![vec![json!(4)]]);
    }

    #[test]
    fn test_many_rows_deduplicate_ids() {
        let executor = MockExecutor::new();
        executor.push_result(QueryResult::from_rows(vec![
            record(json!({ "id": 4, "name": "four" })),
            record(json!({ "id": 5, "name": "five" })),
        ]));

        let mut rows = vec![
            record(json!({ "id": 1, "my_simple": 4 })),
            record(json!({ "id": 2, "my_simple": 5 })),
            record(json!({ "id": 3, "my_simple": 4 })),
            record(json!({ "id": 4, "my_simple": null })),
            record(json!({ "id": 5, "my_simple": 9 })),
        ];
        populate(&executor, "tenant", &populate_simple(), &mut rows).unwrap();

        assert_eq!(
            executor.statements(),
            vec![r#"SELECT * FROM "tenant"."simple" WHERE "id" = ANY($1)"#.to_string()]
        );
        assert_eq!(executor.params(), vec![vec![json!([4, 5, 9])]]);
        assert_eq!(rows[0]["my_simple"]["name"], json!("four"));
        assert_eq!(rows[1]["my_simple"]["name"], json!("five"));
        assert_eq!(rows[2]["my_simple"]["name"], json!("four"));
        assert_eq!(rows[3]["my_simple"], Value::Null);
        // dangling key
        assert_eq!(rows[4]["my_simple"], Value::Null);
    }

    #[test]
    fn test_null_keys_skip_the_follow_up_query() {
        let executor = MockExecutor::new();
        let mut rows = vec![record(json!({ "id": 1, "my_simple": null }))];

        populate(&executor, "public", &populate_simple(), &mut rows).unwrap();
        assert!(executor.statements().is_empty());
        assert_eq!(rows[0]["my_simple"], Value::Null);
    }

    #[test]
    fn test_attached_rows_get_read_defaults() {
        let registry = tests_cfg::registry();
        let schema = registry.require("withrelationships").unwrap();
        let populate_defaults = Populate::resolve(&registry, schema, "my_with_defaults").unwrap();

        let executor = MockExecutor::new();
        executor.push_result(QueryResult::from_rows(vec![record(json!({
            "id": "8", "str_no_def": null, "str_def": null, "num_no_def": null, "num_def": null
        }))]));

        let mut rows = vec![record(json!({ "id": 1, "my_with_defaults": "8" }))];
        populate(&executor, "public", &populate_defaults, &mut rows).unwrap();

        assert_eq!(
            rows[0]["my_with_defaults"],
            json!({ "id": 8, "str_no_def": "", "str_def": "val", "num_no_def": 0, "num_def": 77 })
        );
    }
}
