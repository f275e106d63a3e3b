//! Connection configuration.

use serde::Deserialize;

/// Configuration for a [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Name used in diagnostics of classified errors.
    pub name: String,
    /// Total attempts for a prepared statement failing with a deadlock.
    pub deadlock_retry_attempts: u32,
    /// Whether executed statements are logged.
    pub log_sql: bool,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub max_logged_sql_length: Option<usize>,
    /// Nest transactions with savepoints instead of counting only.
    pub use_savepoints: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            deadlock_retry_attempts: 3,
            log_sql: true,
            max_logged_sql_length: Some(200),
            use_savepoints: true,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set total attempts for deadlocked statements (at least 1).
    pub fn deadlock_retry_attempts(mut self, attempts: u32) -> Self {
        self.deadlock_retry_attempts = attempts.max(1);
        self
    }

    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Set maximum SQL length to log.
    pub fn max_logged_sql_length(mut self, len: usize) -> Self {
        self.max_logged_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation in logs.
    pub fn no_truncate(mut self) -> Self {
        self.max_logged_sql_length = None;
        self
    }

    pub fn use_savepoints(mut self, enabled: bool) -> Self {
        self.use_savepoints = enabled;
        self
    }

    pub(crate) fn truncate_sql(&self, sql: &str) -> String {
        match self.max_logged_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
