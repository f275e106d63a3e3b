//! Error types for dqlkit

use crate::platform::Platform;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for dqlkit operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for query building and database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Mapping or builder misconfiguration (never retryable)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not allowed in the current state of the object
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller passed arguments that cannot be turned into a valid statement
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unique constraint violation
    #[error("{0}")]
    DuplicateEntry(Box<DuplicateEntry>),

    /// NOT NULL constraint violation
    #[error("{0}")]
    EmptyValue(Box<EmptyValue>),

    /// Any other classified driver failure
    #[error("{0}")]
    Database(Box<DatabaseError>),

    /// Failure while counting or iterating a query
    #[error("Query error: {source} (query: {dql})")]
    Query {
        dql: String,
        #[source]
        source: Box<DbError>,
    },

    /// Raw driver failure that has not been classified yet
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wrap an error raised while running `dql`
    pub fn query(dql: impl Into<String>, source: DbError) -> Self {
        Self::Query {
            dql: dql.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is a unique violation error
    pub fn is_duplicate_entry(&self) -> bool {
        matches!(self, Self::DuplicateEntry(_))
    }

    /// Check if this is a NOT NULL violation error
    pub fn is_empty_value(&self) -> bool {
        matches!(self, Self::EmptyValue(_))
    }

    /// Check if this is an invalid-state error
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// The underlying driver failure, if this error carries one
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::DuplicateEntry(e) => Some(&e.context.driver),
            Self::EmptyValue(e) => Some(&e.context.driver),
            Self::Database(e) => Some(&e.driver),
            Self::Driver(e) => Some(e),
            Self::Query { source, .. } => source.driver_error(),
            _ => None,
        }
    }
}

/// Failure reported by a [`Driver`](crate::connection::Driver).
///
/// Carries whatever the driver knows: the SQLSTATE, the vendor error code
/// (MySQL/SQLite numeric codes) and the hints Postgres attaches to a
/// server error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverError {
    pub sqlstate: Option<String>,
    pub code: Option<i64>,
    pub message: String,
    pub constraint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// SQLSTATE class (first two characters), e.g. `23` for integrity violations.
    pub fn sqlstate_class(&self) -> Option<&str> {
        self.sqlstate.as_deref().and_then(|s| s.get(..2))
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(state) = &self.sqlstate {
            write!(f, "SQLSTATE[{state}]")?;
        }
        if let Some(code) = self.code {
            write!(f, "[{code}]")?;
        }
        if self.sqlstate.is_some() || self.code.is_some() {
            f.write_str(": ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for DriverError {}

/// Diagnostic context shared by all classified database errors.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub driver: DriverError,
    pub query: Option<String>,
    pub params: Vec<Value>,
    pub platform: Platform,
    pub connection: String,
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database error on '{}': {}", self.connection, self.driver)?;
        if let Some(query) = &self.query {
            write!(f, " (query: {query}, params: {:?})", self.params)?;
        }
        Ok(())
    }
}

/// A unique key was violated.
///
/// `columns` maps the violated index name to its columns when the index could
/// be resolved. When only the driver named the columns (SQLite), the key is
/// the comma-joined column list and `index` is `None`. It is empty otherwise.
#[derive(Debug, Clone)]
pub struct DuplicateEntry {
    pub index: Option<String>,
    pub table: Option<String>,
    pub columns: BTreeMap<String, Vec<String>>,
    pub context: DatabaseError,
}

impl DuplicateEntry {
    /// Columns of the violated key, if known.
    pub fn index_columns(&self) -> &[String] {
        let columns = match &self.index {
            Some(name) => self.columns.get(name),
            None if self.columns.len() == 1 => self.columns.values().next(),
            None => None,
        };
        columns.map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for DuplicateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Duplicate entry for key '{}' on table '{}': {}",
            self.index.as_deref().unwrap_or("unknown"),
            self.table.as_deref().unwrap_or("unknown"),
            self.context.driver.message
        )
    }
}

/// A NOT NULL column received no value.
#[derive(Debug, Clone)]
pub struct EmptyValue {
    pub column: Option<String>,
    pub context: DatabaseError,
}

impl fmt::Display for EmptyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column '{}' cannot be empty: {}",
            self.column.as_deref().unwrap_or("unknown"),
            self.context.driver.message
        )
    }
}
