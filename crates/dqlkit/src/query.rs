//! Executable query abstraction and its native-SQL implementation.

use crate::builder::BuiltQuery;
use crate::connection::{Connection, Driver, Row};
use crate::error::{DbError, DbResult};
use crate::params::Parameters;
use crate::rsm::{ColumnMapping, HydratedRow, ResultSetMapping};
use crate::value::Value;
use std::future::Future;

/// Shape of fetched results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HydrationMode {
    /// Entities through the result set mapping, when there is one.
    #[default]
    Object,
    /// Plain rows.
    Array,
    /// First column of every row.
    Scalar,
}

/// A query that can be paged, counted and executed.
///
/// This is the seam between [`ResultSet`](crate::result_set::ResultSet)
/// and the engine running the statement.
pub trait Query: Send + Sync {
    type Item: Send;

    /// Statement text.
    fn dql(&self) -> &str;

    fn set_dql(&mut self, dql: String);

    fn first_result(&self) -> Option<u64>;

    fn set_first_result(&mut self, first_result: Option<u64>);

    fn max_results(&self) -> Option<u64>;

    fn set_max_results(&mut self, max_results: Option<u64>);

    fn parameters(&self) -> &Parameters;

    /// Run the statement honouring first/max results.
    fn get_result(
        &self,
        mode: HydrationMode,
    ) -> impl Future<Output = DbResult<Vec<Self::Item>>> + Send;

    /// Count all rows of the statement, ignoring first/max results. With
    /// `fetch_join_collection` distinct root entities are counted.
    fn count(&self, fetch_join_collection: bool) -> impl Future<Output = DbResult<u64>> + Send;

    /// Fetch the current page.
    ///
    /// The default implementation ignores `fetch_join_collection` and calls
    /// [`Query::get_result`].
    fn get_page(
        &self,
        mode: HydrationMode,
        fetch_join_collection: bool,
    ) -> impl Future<Output = DbResult<Vec<Self::Item>>> + Send {
        let _ = fetch_join_collection;
        self.get_result(mode)
    }
}

/// One fetched result of a [`NativeQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    Row(Row),
    Entity(HydratedRow),
    Scalar(Value),
}

/// Native SQL with named parameters, executed through a [`Connection`].
pub struct NativeQuery<'c, D> {
    conn: &'c Connection<D>,
    sql: String,
    parameters: Parameters,
    first_result: Option<u64>,
    max_results: Option<u64>,
    mapping: Option<ResultSetMapping>,
}

impl<D> Clone for NativeQuery<'_, D> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn,
            sql: self.sql.clone(),
            parameters: self.parameters.clone(),
            first_result: self.first_result,
            max_results: self.max_results,
            mapping: self.mapping.clone(),
        }
    }
}

impl<'c, D: Driver> NativeQuery<'c, D> {
    pub fn new(conn: &'c Connection<D>, sql: impl Into<String>) -> Self {
        Self {
            conn,
            sql: sql.into(),
            parameters: Parameters::new(),
            first_result: None,
            max_results: None,
            mapping: None,
        }
    }

    /// Run a statement rendered by a [`DqlBuilder`](crate::builder::DqlBuilder).
    pub fn from_built(conn: &'c Connection<D>, built: BuiltQuery) -> Self {
        Self {
            conn,
            sql: built.dql,
            parameters: built.parameters,
            first_result: built.first_result,
            max_results: built.max_results,
            mapping: None,
        }
    }

    /// Hydrate rows through `mapping` in [`HydrationMode::Object`].
    pub fn with_mapping(mut self, mapping: ResultSetMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.set(name, value);
        self
    }

    pub fn mapping(&self) -> Option<&ResultSetMapping> {
        self.mapping.as_ref()
    }

    fn paged_sql(&self) -> String {
        self.conn
            .platform()
            .apply_limit(&self.sql, self.max_results, self.first_result)
    }

    fn count_sql(&self, fetch_join_collection: bool) -> String {
        let root_columns: Vec<&str> = match (&self.mapping, fetch_join_collection) {
            (Some(mapping), true) => mapping
                .columns()
                .filter(|(_, m)| match m {
                    ColumnMapping::Field { alias, .. } => mapping.is_root_alias(alias),
                    _ => false,
                })
                .map(|(c, _)| c)
                .collect(),
            _ => Vec::new(),
        };

        // no root columns: count rows as fetched
        if root_columns.is_empty() {
            format!("SELECT COUNT(*) FROM ({}) dqlkit_count", self.sql)
        } else {
            format!(
                "SELECT COUNT(*) FROM (SELECT DISTINCT {} FROM ({}) dqlkit_rows) dqlkit_count",
                root_columns.join(", "),
                self.sql
            )
        }
    }
}

impl<D: Driver> Query for NativeQuery<'_, D> {
    type Item = ResultItem;

    fn dql(&self) -> &str {
        &self.sql
    }

    fn set_dql(&mut self, dql: String) {
        self.sql = dql;
    }

    fn first_result(&self) -> Option<u64> {
        self.first_result
    }

    fn set_first_result(&mut self, first_result: Option<u64>) {
        self.first_result = first_result;
    }

    fn max_results(&self) -> Option<u64> {
        self.max_results
    }

    fn set_max_results(&mut self, max_results: Option<u64>) {
        self.max_results = max_results;
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    async fn get_result(&self, mode: HydrationMode) -> DbResult<Vec<ResultItem>> {
        let rows = self
            .conn
            .execute_query(&self.paged_sql(), &self.parameters)
            .await?;
        match (mode, &self.mapping) {
            (HydrationMode::Object, Some(mapping)) => rows
                .iter()
                .map(|row| mapping.hydrate_row(row).map(ResultItem::Entity))
                .collect(),
            (HydrationMode::Scalar, _) => Ok(rows
                .into_iter()
                .map(|row| ResultItem::Scalar(row.get_index(0).cloned().unwrap_or(Value::Null)))
                .collect()),
            _ => Ok(rows.into_iter().map(ResultItem::Row).collect()),
        }
    }

    async fn count(&self, fetch_join_collection: bool) -> DbResult<u64> {
        let sql = self.count_sql(fetch_join_collection);
        let value = self.conn.fetch_scalar(&sql, &self.parameters).await?;
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| DbError::invalid_state(format!("count query returned {value}")))
    }
}
