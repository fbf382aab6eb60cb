//! Statement templates
//!
//! A [`Statement`] is what an entity operation asks for. It is only rendered to
//! SQL when the deferred query resolves, once the namespace is known.
//!
//! Single-row operations target `"id" = (SELECT "id" FROM ... WHERE ...)`, so a
//! filter matching several rows fails in the database with a cardinality
//! violation instead of picking one of them.

use super::compile::{compile_set, compile_values, compile_where, qualified_table, quote_ident, Params};
use super::criteria::Criteria;
use crate::error::OrmError;
use crate::schema::Schema;
use crate::value::{Arg, Props};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert {
        rows: Vec<Props>,
    },
    Select {
        columns: Option<Vec<String>>,
        criteria: Criteria,
        single: bool,
    },
    Update {
        set: Props,
        criteria: Criteria,
        single: bool,
    },
    Delete {
        criteria: Criteria,
        single: bool,
    },
}

impl Statement {
    /// Whether `RETURNING *` may be appended
    pub fn writes(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }

    /// SQL text and arguments against `namespace`
    pub fn render(&self, schema: &Schema, namespace: &str) -> Result<(String, Vec<Arg>), OrmError> {
        let table = qualified_table(namespace, schema.table_name());
        let mut params = Params::new();

        let sql = match self {
            Statement::Insert { rows } => {
                format!("INSERT INTO {table} {}", compile_values(schema, rows, &mut params)?)
            }
            Statement::Select {
                columns,
                criteria,
                single,
            } => {
                let columns = match columns {
                    Some(columns) => columns
                        .iter()
                        .map(|column| quote_ident(column))
                        .collect::<Vec<_>>()
                        .join(", "),
                    None => "*".to_string(),
                };
                let filter = render_filter(&table, criteria, *single, &mut params);
                format!("SELECT {columns} FROM {table}{filter}")
            }
            Statement::Update {
                set,
                criteria,
                single,
            } => {
                let assignments = compile_set(schema, set, &mut params)
                    .ok_or_else(|| OrmError::config("update has no columns to set"))?;
                let filter = render_filter(&table, criteria, *single, &mut params);
                format!("UPDATE {table} SET {assignments}{filter}")
            }
            Statement::Delete { criteria, single } => {
                let filter = render_filter(&table, criteria, *single, &mut params);
                format!("DELETE FROM {table}{filter}")
            }
        };

        Ok((sql, params.into_args()))
    }
}

fn render_filter(table: &str, criteria: &Criteria, single: bool, params: &mut Params) -> String {
    let clause = compile_where(criteria, params);
    if single {
        let id = quote_ident("id");
        match clause {
            Some(clause) => format!(" WHERE {id} = (SELECT {id} FROM {table} WHERE {clause})"),
            None => format!(" WHERE {id} = (SELECT {id} FROM {table})"),
        }
    } else {
        match clause {
            Some(clause) => format!(" WHERE {clause}"),
            None => String::new(),
        }
    }
}
