//! Index introspection for duplicate-key diagnostics.
//!
//! Queries go straight to the driver: a failing introspection query is
//! reported as a plain [`DbError::Driver`] and never classified again.

use crate::connection::{Connection, Driver, Row};
use crate::error::{DbError, DbResult};
use crate::platform::Platform;
use crate::value::Value;

/// An index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

const PG_INDEXES_SQL: &str = "SELECT i.relname AS index_name, a.attname AS column_name, \
     ix.indisunique AS is_unique, ix.indisprimary AS is_primary \
     FROM pg_index ix \
     JOIN pg_class t ON t.oid = ix.indrelid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n) \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
     WHERE t.relname = $1 \
     ORDER BY i.relname, k.n";

pub struct SchemaManager<'c, D> {
    conn: &'c Connection<D>,
}

impl<'c, D: Driver> SchemaManager<'c, D> {
    pub fn new(conn: &'c Connection<D>) -> Self {
        Self { conn }
    }

    /// List the indexes of `table`, columns in index order.
    pub async fn list_table_indexes(&self, table: &str) -> DbResult<Vec<Index>> {
        let platform = self.conn.platform();
        match platform {
            Platform::MySql => {
                let sql = format!("SHOW INDEX FROM {}", platform.quote_identifier(table));
                let rows = self.fetch(&sql, &[]).await?;
                let mut indexes: Vec<Index> = Vec::new();
                for row in &rows {
                    let (Some(name), Some(column)) = (
                        text(row, "Key_name"),
                        text(row, "Column_name"),
                    ) else {
                        continue;
                    };
                    let unique = !row.get_ignore_case("Non_unique").is_some_and(truthy);
                    push_column(&mut indexes, name, column, unique, name == "PRIMARY");
                }
                Ok(indexes)
            }
            Platform::Sqlite => {
                let sql = format!("PRAGMA index_list({})", platform.quote_identifier(table));
                let list = self.fetch(&sql, &[]).await?;
                let mut indexes = Vec::with_capacity(list.len());
                for row in &list {
                    let Some(name) = text(row, "name") else {
                        continue;
                    };
                    let unique = row.get_ignore_case("unique").is_some_and(truthy);
                    let primary = text(row, "origin") == Some("pk");
                    let sql = format!("PRAGMA index_info({})", platform.quote_identifier(name));
                    let mut info = self.fetch(&sql, &[]).await?;
                    info.sort_by_key(|r| r.get_ignore_case("seqno").and_then(Value::as_i64));
                    let columns = info
                        .iter()
                        .filter_map(|r| text(r, "name").map(str::to_string))
                        .collect();
                    indexes.push(Index {
                        name: name.to_string(),
                        columns,
                        unique,
                        primary,
                    });
                }
                Ok(indexes)
            }
            Platform::Postgres => {
                let bare = table.rsplit('.').next().unwrap_or(table);
                let rows = self
                    .fetch(PG_INDEXES_SQL, &[Value::Text(bare.to_string())])
                    .await?;
                let mut indexes: Vec<Index> = Vec::new();
                for row in &rows {
                    let (Some(name), Some(column)) =
                        (text(row, "index_name"), text(row, "column_name"))
                    else {
                        continue;
                    };
                    let unique = row.get_ignore_case("is_unique").is_some_and(truthy);
                    let primary = row.get_ignore_case("is_primary").is_some_and(truthy);
                    push_column(&mut indexes, name, column, unique, primary);
                }
                Ok(indexes)
            }
        }
    }

    /// The index named `name` (case-insensitive) on `table`, if any.
    pub async fn find_index(&self, table: &str, name: &str) -> DbResult<Option<Index>> {
        Ok(self
            .list_table_indexes(table)
            .await?
            .into_iter()
            .find(|idx| idx.name.eq_ignore_ascii_case(name)))
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.conn
            .driver()
            .query(sql, params)
            .await
            .map_err(DbError::Driver)
    }
}

fn text<'r>(row: &'r Row, column: &str) -> Option<&'r str> {
    row.get_ignore_case(column).and_then(Value::as_str)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Text(s) => matches!(s.as_str(), "1" | "t" | "true" | "TRUE" | "YES"),
        _ => false,
    }
}

fn push_column(indexes: &mut Vec<Index>, name: &str, column: &str, unique: bool, primary: bool) {
    match indexes.iter_mut().find(|idx| idx.name == name) {
        Some(idx) => idx.columns.push(column.to_string()),
        None => indexes.push(Index {
            name: name.to_string(),
            columns: vec![column.to_string()],
            unique,
            primary,
        }),
    }
}
