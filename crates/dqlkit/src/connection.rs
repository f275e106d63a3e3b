//! Connection wrapper: statement execution with error classification,
//! deadlock-retrying prepared statements and savepoint-nested transactions.

use crate::classify;
use crate::config::ConnectionConfig;
use crate::error::{DbError, DbResult, DriverError};
use crate::params::Parameters;
use crate::platform::Platform;
use crate::schema::SchemaManager;
use crate::value::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Low-level database access.
///
/// Placeholders in `sql` are already in the platform's positional syntax
/// (see [`Platform::placeholder`]); `params` bind to them in order.
pub trait Driver: Send + Sync {
    fn platform(&self) -> Platform;

    /// Run a statement returning rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<Row>, DriverError>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<u64, DriverError>> + Send;
}

/// A fetched row: column names and values in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Case-insensitive column lookup.
    pub fn get_ignore_case(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// What a statement operates on, attached when the statement is built so a
/// failure can be diagnosed without parsing the SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementContext {
    pub table: Option<String>,
}

impl StatementContext {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
        }
    }
}

/// A database connection.
///
/// Every driver failure is turned into one of the crate's typed errors by
/// [`Connection::resolve_exception`].
#[derive(Debug)]
pub struct Connection<D> {
    driver: D,
    config: ConnectionConfig,
    nesting_level: AtomicU32,
    rollback_only: AtomicBool,
}

impl<D: Driver> Connection<D> {
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, ConnectionConfig::default())
    }

    pub fn with_config(driver: D, config: ConnectionConfig) -> Self {
        Self {
            driver,
            config,
            nesting_level: AtomicU32::new(0),
            rollback_only: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.driver.platform()
    }

    pub fn schema_manager(&self) -> SchemaManager<'_, D> {
        SchemaManager::new(self)
    }

    // ==================== Execution ====================

    /// Run a query with named parameters.
    pub async fn execute_query(&self, sql: &str, params: &Parameters) -> DbResult<Vec<Row>> {
        let (sql, values) = params.expand(sql, self.platform())?;
        self.query(&sql, &values).await
    }

    /// Run a data-modifying statement with named parameters.
    pub async fn execute_update(&self, sql: &str, params: &Parameters) -> DbResult<u64> {
        let (sql, values) = params.expand(sql, self.platform())?;
        self.log_sql(&sql, values.len());
        match self.driver.execute(&sql, &values).await {
            Ok(affected) => Ok(affected),
            Err(e) => Err(self
                .resolve_exception(e, Some(&sql), &values, &StatementContext::default())
                .await),
        }
    }

    /// Run a query with positional parameters.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.log_sql(sql, params.len());
        match self.driver.query(sql, params).await {
            Ok(rows) => Ok(rows),
            Err(e) => Err(self
                .resolve_exception(e, Some(sql), params, &StatementContext::default())
                .await),
        }
    }

    /// Run a statement without parameters.
    pub async fn exec(&self, sql: &str) -> DbResult<u64> {
        self.log_sql(sql, 0);
        match self.driver.execute(sql, &[]).await {
            Ok(affected) => Ok(affected),
            Err(e) => Err(self
                .resolve_exception(e, Some(sql), &[], &StatementContext::default())
                .await),
        }
    }

    /// First column of the first row, `Value::Null` when there is none.
    pub async fn fetch_scalar(&self, sql: &str, params: &Parameters) -> DbResult<Value> {
        let rows = self.execute_query(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.values.into_iter().next())
            .unwrap_or(Value::Null))
    }

    /// Prepare a statement with positional placeholders.
    pub fn prepare(&self, sql: impl Into<String>) -> Statement<'_, D> {
        Statement {
            conn: self,
            sql: sql.into(),
            params: Vec::new(),
            context: StatementContext::default(),
        }
    }

    /// Identifier generated by the last insert on this connection.
    pub async fn last_insert_id(&self, sequence: Option<&str>) -> DbResult<Value> {
        let sql = self.platform().last_insert_id_sql(sequence);
        let value = self.fetch_scalar(&sql, &Parameters::new()).await?;
        if value.is_null() {
            return Err(DbError::invalid_state(
                "the database did not report a generated identifier",
            ));
        }
        Ok(value)
    }

    /// Classify a driver failure into a typed error.
    ///
    /// Unique and NOT NULL violations become [`DbError::DuplicateEntry`] and
    /// [`DbError::EmptyValue`], everything else [`DbError::Database`].
    pub async fn resolve_exception(
        &self,
        err: DriverError,
        query: Option<&str>,
        params: &[Value],
        context: &StatementContext,
    ) -> DbError {
        classify::classify(self, err, query, params, context).await
    }

    // ==================== Transactions ====================

    pub fn transaction_nesting_level(&self) -> u32 {
        self.nesting_level.load(Ordering::SeqCst)
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_nesting_level() > 0
    }

    /// Start a transaction, or a savepoint when one is already active.
    pub async fn begin_transaction(&self) -> DbResult<()> {
        let level = self.nesting_level.fetch_add(1, Ordering::SeqCst) + 1;
        let sql = if level == 1 {
            self.rollback_only.store(false, Ordering::SeqCst);
            Some(match self.platform() {
                Platform::MySql => "START TRANSACTION".to_string(),
                Platform::Sqlite | Platform::Postgres => "BEGIN".to_string(),
            })
        } else if self.config.use_savepoints {
            Some(format!("SAVEPOINT {}", savepoint_name(level)))
        } else {
            None
        };

        if let Some(sql) = sql {
            if let Err(e) = self.exec(&sql).await {
                self.nesting_level.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Commit the current transaction level.
    pub async fn commit(&self) -> DbResult<()> {
        let level = self.transaction_nesting_level();
        if level == 0 {
            return Err(DbError::invalid_state("there is no active transaction"));
        }
        if level == 1 && self.rollback_only.load(Ordering::SeqCst) {
            return Err(DbError::invalid_state(
                "transaction is marked rollback-only by a nested rollback",
            ));
        }

        if level == 1 {
            self.exec("COMMIT").await?;
        } else if self.config.use_savepoints {
            self.exec(&format!("RELEASE SAVEPOINT {}", savepoint_name(level)))
                .await?;
        }
        self.nesting_level.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Roll back the current transaction level.
    ///
    /// The nesting level drops even when the rollback statement fails, so a
    /// failed rollback never leaves the connection believing a transaction
    /// is still open.
    pub async fn rollback(&self) -> DbResult<()> {
        let level = self.transaction_nesting_level();
        if level == 0 {
            return Err(DbError::invalid_state("there is no active transaction"));
        }
        self.nesting_level.fetch_sub(1, Ordering::SeqCst);

        if level == 1 {
            self.rollback_only.store(false, Ordering::SeqCst);
            self.exec("ROLLBACK").await?;
        } else if self.config.use_savepoints {
            self.exec(&format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(level)))
                .await?;
        } else {
            self.rollback_only.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn log_sql(&self, sql: &str, param_count: usize) {
        if !self.config.log_sql {
            return;
        }
        tracing::debug!(
            target: "dqlkit.sql",
            connection = %self.config.name,
            platform = %self.platform(),
            param_count,
            sql = %self.config.truncate_sql(sql),
        );
    }
}

fn savepoint_name(level: u32) -> String {
    format!("DQLKIT_SAVEPOINT_{level}")
}

/// A prepared statement with positional parameters.
///
/// Execution is retried while the failure is a deadlock, up to
/// [`ConnectionConfig::deadlock_retry_attempts`] attempts in total.
#[derive(Debug)]
pub struct Statement<'c, D> {
    conn: &'c Connection<D>,
    sql: String,
    params: Vec<Value>,
    context: StatementContext,
}

impl<'c, D: Driver> Statement<'c, D> {
    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(values);
        self
    }

    /// Attach diagnostics context used when classifying a failure.
    pub fn with_context(mut self, context: StatementContext) -> Self {
        self.context = context;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Execute and return the number of affected rows.
    pub async fn execute(&self) -> DbResult<u64> {
        let attempts = self.conn.config.deadlock_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.conn.log_sql(&self.sql, self.params.len());
            match self.conn.driver.execute(&self.sql, &self.params).await {
                Ok(affected) => return Ok(affected),
                Err(e) if attempt < attempts && self.conn.platform().is_deadlock(&e) => {
                    self.log_retry(attempt, &e);
                    attempt += 1;
                }
                Err(e) => return Err(self.resolve(e).await),
            }
        }
    }

    /// Execute and return all rows.
    pub async fn fetch_all(&self) -> DbResult<Vec<Row>> {
        let attempts = self.conn.config.deadlock_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.conn.log_sql(&self.sql, self.params.len());
            match self.conn.driver.query(&self.sql, &self.params).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < attempts && self.conn.platform().is_deadlock(&e) => {
                    self.log_retry(attempt, &e);
                    attempt += 1;
                }
                Err(e) => return Err(self.resolve(e).await),
            }
        }
    }

    fn log_retry(&self, attempt: u32, err: &DriverError) {
        tracing::warn!(
            target: "dqlkit.sql",
            attempt,
            sqlstate = err.sqlstate.as_deref().unwrap_or("-"),
            code = err.code.unwrap_or_default(),
            "deadlock detected, retrying statement"
        );
    }

    async fn resolve(&self, err: DriverError) -> DbError {
        self.conn
            .resolve_exception(err, Some(&self.sql), &self.params, &self.context)
            .await
    }
}
