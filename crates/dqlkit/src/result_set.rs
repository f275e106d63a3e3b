//! Lazily paginated and counted query results.
//!
//! [`ResultSet`] wraps a [`Query`]. Sorting and paging rewrite the query
//! until results are fetched; from then on the result set is frozen. The
//! total count is computed once through a [`PaginatedQuery`] and cached.

use crate::error::{DbError, DbResult};
use crate::paginator::Paginator;
use crate::query::{HydrationMode, Query};
use regex::Regex;
use std::sync::OnceLock;

/// Count-capable wrapper around a copy of the base query.
#[derive(Debug, Clone)]
pub struct PaginatedQuery<Q> {
    query: Q,
    fetch_join_collection: bool,
}

impl<Q: Query> PaginatedQuery<Q> {
    pub fn new(query: Q, fetch_join_collection: bool) -> Self {
        Self {
            query,
            fetch_join_collection,
        }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    pub fn fetch_join_collection(&self) -> bool {
        self.fetch_join_collection
    }

    /// Total rows of the base query (distinct roots when fetch-joining).
    pub async fn count(&self) -> DbResult<u64> {
        self.query.count(self.fetch_join_collection).await
    }

    /// Rows of the page selected by the query's first/max results.
    pub async fn get_page(&self, mode: HydrationMode) -> DbResult<Vec<Q::Item>> {
        self.query.get_page(mode, self.fetch_join_collection).await
    }
}

/// Query results with lazy paging and total count.
///
/// A `ResultSet` is not shared between tasks; memoized state lives in the
/// instance and every method takes `&mut self`.
#[derive(Debug)]
pub struct ResultSet<Q: Query> {
    query: Q,
    fetch_join_collection: bool,
    total_count: Option<u64>,
    paginated: Option<PaginatedQuery<Q>>,
    items: Option<Vec<Q::Item>>,
}

fn direction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s+(?:ASC|DESC)\s*$").expect("invalid built-in sort direction regex")
    })
}

fn order_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("invalid built-in ORDER BY regex"))
}

fn clause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:FROM|WHERE|GROUP\s+BY|JOIN)\b").expect("invalid built-in clause regex")
    })
}

/// Whether `dql` already ends with a top-level ORDER BY clause.
fn has_trailing_order_by(dql: &str) -> bool {
    let Some(found) = order_by_regex().find_iter(dql).last() else {
        return false;
    };
    let tail = &dql[found.end()..];
    let opened = tail.matches('(').count();
    let closed = tail.matches(')').count();
    closed <= opened && !clause_regex().is_match(tail)
}

impl<Q: Query + Clone> ResultSet<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            fetch_join_collection: true,
            total_count: None,
            paginated: None,
            items: None,
        }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Whether results were fetched and the query can no longer change.
    pub fn is_frozen(&self) -> bool {
        self.paginated.is_some() || self.items.is_some()
    }

    fn updating(&self) -> DbResult<()> {
        if self.is_frozen() {
            return Err(DbError::invalid_state(
                "cannot modify result set, that was already fetched from storage",
            ));
        }
        Ok(())
    }

    /// Count distinct root entities, for queries fetch-joining collections.
    /// Changing the flag drops a cached total count.
    pub fn set_fetch_join_collection(&mut self, fetch_join_collection: bool) -> DbResult<&mut Self> {
        self.updating()?;
        if self.fetch_join_collection != fetch_join_collection {
            self.fetch_join_collection = fetch_join_collection;
            self.total_count = None;
        }
        Ok(self)
    }

    /// Append ORDER BY items; items without a direction sort ascending.
    pub fn apply_sorting(&mut self, columns: &[&str]) -> DbResult<&mut Self> {
        self.updating()?;

        let sorting: Vec<String> = columns
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| {
                if direction_regex().is_match(c) {
                    c.to_string()
                } else {
                    format!("{c} ASC")
                }
            })
            .collect();

        if !sorting.is_empty() {
            let dql = self.query.dql().trim_end();
            let separator = if has_trailing_order_by(dql) {
                ", "
            } else {
                " ORDER BY "
            };
            let dql = format!("{dql}{separator}{}", sorting.join(", "));
            self.query.set_dql(dql);
        }
        Ok(self)
    }

    /// Select the rows `offset .. offset + limit`.
    pub fn apply_paging(&mut self, offset: u64, limit: u64) -> DbResult<&mut Self> {
        let first = (offset > 0).then_some(offset);
        if self.query.first_result() != first || self.query.max_results() != Some(limit) {
            self.updating()?;
            self.query.set_first_result(first);
            self.query.set_max_results(Some(limit));
        }
        Ok(self)
    }

    /// Feed the total count into `paginator` and page by its offset/length.
    pub async fn apply_paginator(
        &mut self,
        paginator: &mut Paginator,
        items_per_page: Option<u64>,
    ) -> DbResult<&mut Self> {
        if let Some(items_per_page) = items_per_page {
            paginator.set_items_per_page(items_per_page);
        }
        paginator.set_item_count(self.get_total_count().await?);
        self.apply_paging(paginator.offset(), paginator.length())
    }

    /// Total number of rows regardless of paging, computed once.
    pub async fn get_total_count(&mut self) -> DbResult<u64> {
        if let Some(count) = self.total_count {
            return Ok(count);
        }
        let result = match &self.paginated {
            Some(paginated) => paginated.count().await,
            None => {
                PaginatedQuery::new(self.query.clone(), self.fetch_join_collection)
                    .count()
                    .await
            }
        };
        let count = result.map_err(|e| DbError::query(self.query.dql(), e))?;
        tracing::debug!(target: "dqlkit.sql", count, "result set counted");
        self.total_count = Some(count);
        Ok(count)
    }

    /// Fetch the results once and keep them.
    ///
    /// Without paging the query runs directly; with first/max results set
    /// the rows come through the paginated query. `mode` applies to the
    /// first call only.
    pub async fn get_iterator(&mut self, mode: HydrationMode) -> DbResult<&[Q::Item]> {
        if self.items.is_none() {
            let paged = self.query.max_results().is_some_and(|m| m > 0)
                || self.query.first_result().is_some_and(|f| f > 0);
            let result = if paged {
                self.paginated_query().get_page(mode).await
            } else {
                self.query.get_result(mode).await
            };
            let items = result.map_err(|e| DbError::query(self.query.dql(), e))?;
            self.items = Some(items);
        }
        Ok(self.items.as_deref().unwrap_or(&[]))
    }

    /// The paginated query, created once; freezes the result set.
    pub fn paginated_query(&mut self) -> &PaginatedQuery<Q> {
        self.paginated.get_or_insert_with(|| {
            PaginatedQuery::new(self.query.clone(), self.fetch_join_collection)
        })
    }

    /// No rows at the current offset.
    pub async fn is_empty(&mut self) -> DbResult<bool> {
        let offset = self.query.first_result().unwrap_or(0);
        Ok(self.get_total_count().await? <= offset)
    }
}
