//! Database platform specifics: error codes, quoting and introspection SQL.

use crate::error::DriverError;
use serde::Deserialize;
use std::fmt;

/// The relational database a [`Driver`](crate::connection::Driver) talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MySql,
    Sqlite,
    Postgres,
}

impl Platform {
    /// Vendor code (MySQL/SQLite) or SQLSTATE (Postgres) of a unique violation.
    pub fn unique_violation_code(self) -> &'static str {
        match self {
            Platform::MySql => "1062",
            Platform::Sqlite => "19",
            Platform::Postgres => "23505",
        }
    }

    /// Vendor code or SQLSTATE of a NOT NULL violation.
    pub fn not_null_violation_code(self) -> &'static str {
        match self {
            Platform::MySql => "1048",
            Platform::Sqlite => "19",
            Platform::Postgres => "23502",
        }
    }

    /// The code this platform uses to identify `err`: the vendor code on
    /// MySQL/SQLite, the SQLSTATE on Postgres.
    pub fn error_code(self, err: &DriverError) -> Option<String> {
        match self {
            Platform::Postgres => err.sqlstate.clone(),
            Platform::MySql | Platform::Sqlite => err.code.map(|c| c.to_string()),
        }
    }

    /// Whether `err` is a unique violation on this platform.
    pub fn is_unique_violation(self, err: &DriverError) -> bool {
        if self.error_code(err).as_deref() != Some(self.unique_violation_code()) {
            return false;
        }
        // SQLite reports every constraint failure with code 19.
        match self {
            Platform::Sqlite => err.message.contains("UNIQUE constraint failed"),
            _ => true,
        }
    }

    /// Whether `err` signals a deadlock or serialization failure worth retrying.
    pub fn is_deadlock(self, err: &DriverError) -> bool {
        match err.sqlstate.as_deref() {
            Some("40001") => return true,
            Some("40P01") if self == Platform::Postgres => return true,
            _ => {}
        }
        self == Platform::MySql && err.code == Some(1213)
    }

    /// Positional placeholder for the `n`-th (1-based) parameter.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Platform::Postgres => format!("${n}"),
            Platform::MySql | Platform::Sqlite => "?".to_string(),
        }
    }

    /// Quote an identifier (table or column name).
    pub fn quote_identifier(self, ident: &str) -> String {
        let (open, close) = match self {
            Platform::MySql => ('`', '`'),
            Platform::Sqlite | Platform::Postgres => ('"', '"'),
        };
        ident
            .split('.')
            .map(|seg| {
                let escaped = seg.replace(close, &format!("{close}{close}"));
                format!("{open}{escaped}{close}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Append LIMIT/OFFSET to `sql`.
    pub fn apply_limit(self, sql: &str, max_results: Option<u64>, first_result: Option<u64>) -> String {
        let offset = first_result.filter(|&o| o > 0);
        match (max_results, offset) {
            (None, None) => sql.to_string(),
            (Some(max), None) => format!("{sql} LIMIT {max}"),
            (Some(max), Some(offset)) => format!("{sql} LIMIT {max} OFFSET {offset}"),
            (None, Some(offset)) => match self {
                Platform::MySql => format!("{sql} LIMIT 18446744073709551615 OFFSET {offset}"),
                Platform::Sqlite => format!("{sql} LIMIT -1 OFFSET {offset}"),
                Platform::Postgres => format!("{sql} OFFSET {offset}"),
            },
        }
    }

    /// SQL returning the identifier generated by the last insert.
    pub fn last_insert_id_sql(self, sequence: Option<&str>) -> String {
        match (self, sequence) {
            (Platform::MySql, _) => "SELECT LAST_INSERT_ID()".to_string(),
            (Platform::Sqlite, _) => "SELECT last_insert_rowid()".to_string(),
            (Platform::Postgres, Some(seq)) => {
                format!("SELECT currval('{}')", seq.replace('\'', "''"))
            }
            (Platform::Postgres, None) => "SELECT lastval()".to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::MySql => "mysql",
            Platform::Sqlite => "sqlite",
            Platform::Postgres => "postgres",
        })
    }
}
