//! Driver error classification.
//!
//! Unique and NOT NULL violations are recognized per platform and turned into
//! [`DuplicateEntry`] / [`EmptyValue`] errors. Names of the violated index,
//! table and column are extracted on a best-effort basis: anything that
//! cannot be resolved is left empty, classification itself never fails.

use crate::connection::{Connection, Driver, StatementContext};
use crate::error::{DatabaseError, DbError, DriverError, DuplicateEntry, EmptyValue};
use crate::platform::Platform;
use crate::value::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn mysql_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"for key '([^']+)'").expect("invalid built-in MySQL duplicate key regex")
    })
}

fn mysql_null_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Column '([^']+)' cannot be null")
            .expect("invalid built-in MySQL not-null regex")
    })
}

fn pg_constraint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"unique constraint "([^"]+)""#)
            .expect("invalid built-in Postgres constraint regex")
    })
}

fn pg_key_columns_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Key \(([^)]+)\)=").expect("invalid built-in Postgres key regex")
    })
}

fn pg_null_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"column "([^"]+)""#).expect("invalid built-in Postgres column regex")
    })
}

fn sqlite_constraint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(UNIQUE|NOT NULL) constraint failed: (.+)$")
            .expect("invalid built-in SQLite constraint regex")
    })
}

fn statement_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)^\s*(?:INSERT\s+(?:IGNORE\s+)?INTO|REPLACE\s+INTO|UPDATE(?:\s+IGNORE)?|DELETE\s+FROM)\s+([`"]?[\w.]+[`"]?)"#,
        )
        .expect("invalid built-in statement table regex")
    })
}

/// Table a data-modifying statement writes to, parsed from its verb.
pub fn table_from_statement(sql: &str) -> Option<String> {
    statement_table_regex()
        .captures(sql)
        .map(|c| c[1].replace(['`', '"'], ""))
}

/// Strip a `table.` prefix (MySQL 8 reports `users.uniq_email`).
fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

pub(crate) async fn classify<D: Driver>(
    conn: &Connection<D>,
    err: DriverError,
    query: Option<&str>,
    params: &[Value],
    context: &StatementContext,
) -> DbError {
    let platform = conn.platform();
    let table = context
        .table
        .clone()
        .or_else(|| err.table.clone())
        .or_else(|| query.and_then(table_from_statement));
    let kind = detect(platform, &err);
    let context = DatabaseError {
        driver: err,
        query: query.map(str::to_string),
        params: params.to_vec(),
        platform,
        connection: conn.config().name.clone(),
    };

    match kind {
        Violation::Unique { index, columns } => {
            let index = index.map(|i| unqualified(&i).to_string());
            let (index, columns) = match (index, columns) {
                (Some(name), Some(columns)) => {
                    (Some(name.clone()), BTreeMap::from([(name, columns)]))
                }
                (None, Some(columns)) => {
                    match index_with_columns(conn, table.as_deref(), &columns).await {
                        Some(name) => (Some(name.clone()), BTreeMap::from([(name, columns)])),
                        // inline UNIQUE, autoindex or no introspection
                        None => (None, BTreeMap::from([(columns.join(","), columns)])),
                    }
                }
                (index, None) => {
                    let columns =
                        resolve_index_columns(conn, table.as_deref(), index.as_deref()).await;
                    (index, columns)
                }
            };
            tracing::debug!(
                target: "dqlkit.sql",
                index = index.as_deref().unwrap_or("-"),
                table = table.as_deref().unwrap_or("-"),
                "unique constraint violated"
            );
            DbError::DuplicateEntry(Box::new(DuplicateEntry {
                index,
                table,
                columns,
                context,
            }))
        }
        Violation::NotNull { column } => {
            tracing::debug!(
                target: "dqlkit.sql",
                column = column.as_deref().unwrap_or("-"),
                "not-null constraint violated"
            );
            DbError::EmptyValue(Box::new(EmptyValue { column, context }))
        }
        Violation::Other => DbError::Database(Box::new(context)),
    }
}

#[derive(Debug, PartialEq)]
enum Violation {
    /// `columns` is set when the driver message names them directly.
    Unique {
        index: Option<String>,
        columns: Option<Vec<String>>,
    },
    NotNull {
        column: Option<String>,
    },
    Other,
}

fn detect(platform: Platform, err: &DriverError) -> Violation {
    let message = err.message.as_str();
    let code = platform.error_code(err);
    let code = code.as_deref();
    let unique = code == Some(platform.unique_violation_code());
    let not_null = code == Some(platform.not_null_violation_code());

    match platform {
        Platform::MySql => {
            if err.sqlstate.as_deref() != Some("23000") {
                Violation::Other
            } else if unique {
                Violation::Unique {
                    index: capture(mysql_key_regex(), message),
                    columns: None,
                }
            } else if not_null {
                Violation::NotNull {
                    column: capture(mysql_null_column_regex(), message),
                }
            } else {
                Violation::Other
            }
        }
        Platform::Postgres => {
            if unique {
                let index = err
                    .constraint
                    .clone()
                    .or_else(|| capture(pg_constraint_regex(), message));
                let columns = capture(pg_key_columns_regex(), message).map(|cols| split_list(&cols));
                Violation::Unique { index, columns }
            } else if not_null {
                Violation::NotNull {
                    column: err
                        .column
                        .clone()
                        .or_else(|| capture(pg_null_column_regex(), message)),
                }
            } else {
                Violation::Other
            }
        }
        Platform::Sqlite => {
            if !unique && !not_null {
                return Violation::Other;
            }
            // Both share code 19; the message tells them apart.
            let Some(caps) = sqlite_constraint_regex().captures(message) else {
                return Violation::Other;
            };
            let columns: Vec<String> = split_list(&caps[2])
                .iter()
                .map(|c| unqualified(c).to_string())
                .collect();
            if &caps[1] == "UNIQUE" {
                // SQLite names the columns, not the index.
                Violation::Unique {
                    index: None,
                    columns: Some(columns),
                }
            } else {
                Violation::NotNull {
                    column: columns.into_iter().next(),
                }
            }
        }
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].to_string())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn resolve_index_columns<D: Driver>(
    conn: &Connection<D>,
    table: Option<&str>,
    index: Option<&str>,
) -> BTreeMap<String, Vec<String>> {
    let (Some(table), Some(index)) = (table, index) else {
        return BTreeMap::new();
    };
    match conn.schema_manager().find_index(table, index).await {
        Ok(Some(found)) => BTreeMap::from([(found.name, found.columns)]),
        Ok(None) => BTreeMap::new(),
        Err(e) => {
            tracing::debug!(
                target: "dqlkit.sql",
                table,
                index,
                error = %e,
                "could not introspect indexes for duplicate entry"
            );
            BTreeMap::new()
        }
    }
}

/// Name of the unique index covering exactly `columns`.
async fn index_with_columns<D: Driver>(
    conn: &Connection<D>,
    table: Option<&str>,
    columns: &[String],
) -> Option<String> {
    let table = table?;
    match conn.schema_manager().list_table_indexes(table).await {
        Ok(indexes) => indexes
            .into_iter()
            .find(|idx| idx.unique && idx.columns == columns)
            .map(|idx| idx.name),
        Err(e) => {
            tracing::debug!(
                target: "dqlkit.sql",
                table,
                error = %e,
                "could not introspect indexes for duplicate entry"
            );
            None
        }
    }
}
