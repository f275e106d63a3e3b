mod common;

use common::MockDb;
use dqlkit::{
    DbError, DbResult, DqlBuilder, HydrationMode, NativeQuery, Paginator, Parameters, Platform,
    Query, ResultItem, ResultSet, Row, Value, args,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory query over the numbers `0..total`.
#[derive(Debug, Clone)]
struct NumbersQuery {
    dql: String,
    first_result: Option<u64>,
    max_results: Option<u64>,
    parameters: Parameters,
    total: i64,
    counts: Arc<AtomicUsize>,
    fail_count: bool,
}

impl NumbersQuery {
    fn new(total: i64) -> Self {
        Self {
            dql: "SELECT n FROM Number n".into(),
            first_result: None,
            max_results: None,
            parameters: Parameters::new(),
            total,
            counts: Arc::new(AtomicUsize::new(0)),
            fail_count: false,
        }
    }
}

impl Query for NumbersQuery {
    type Item = i64;

    fn dql(&self) -> &str {
        &self.dql
    }

    fn set_dql(&mut self, dql: String) {
        self.dql = dql;
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

    async fn get_result(&self, _mode: HydrationMode) -> DbResult<Vec<i64>> {
        let first = self.first_result.unwrap_or(0) as usize;
        let max = self.max_results.map_or(usize::MAX, |m| m as usize);
        Ok((0..self.total).skip(first).take(max).collect())
    }

    async fn count(&self, _fetch_join_collection: bool) -> DbResult<u64> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        if self.fail_count {
            return Err(DbError::invalid_state("count failed"));
        }
        Ok(self.total as u64)
    }
}

#[tokio::test]
async fn total_count_is_computed_once() {
    let query = NumbersQuery::new(25);
    let counts = Arc::clone(&query.counts);
    let mut results = ResultSet::new(query);

    assert_eq!(results.get_total_count().await.unwrap(), 25);
    assert_eq!(results.get_total_count().await.unwrap(), 25);
    assert_eq!(counts.load(Ordering::SeqCst), 1);
    assert!(!results.is_frozen());
}

#[tokio::test]
async fn result_set_is_frozen_after_fetching() {
    let mut results = ResultSet::new(NumbersQuery::new(5));
    results.apply_paging(0, 2).unwrap();

    assert_eq!(results.get_iterator(HydrationMode::Object).await.unwrap(), &[0, 1]);
    assert!(results.is_frozen());

    let err = results.apply_sorting(&["n.value"]).unwrap_err();
    assert!(err.is_invalid_state());
    assert!(results.apply_paging(2, 2).unwrap_err().is_invalid_state());
    assert!(results.set_fetch_join_collection(false).is_err());
    // Same window again is not a modification.
    assert!(results.apply_paging(0, 2).is_ok());
}

#[tokio::test]
async fn unpaged_iteration_runs_the_query_directly() {
    let mut results = ResultSet::new(NumbersQuery::new(3));
    let items = results.get_iterator(HydrationMode::Object).await.unwrap().to_vec();
    assert_eq!(items, vec![0, 1, 2]);
    assert_eq!(results.get_iterator(HydrationMode::Array).await.unwrap().len(), 3);
}

#[tokio::test]
async fn sorting_appends_to_the_order_by_clause() {
    let mut results = ResultSet::new(NumbersQuery::new(3));
    results.apply_sorting(&["n.value", "n.id DESC"]).unwrap();
    assert_eq!(
        results.query().dql(),
        "SELECT n FROM Number n ORDER BY n.value ASC, n.id DESC"
    );

    results.apply_sorting(&["n.label"]).unwrap();
    assert_eq!(
        results.query().dql(),
        "SELECT n FROM Number n ORDER BY n.value ASC, n.id DESC, n.label ASC"
    );

    results.apply_sorting(&[]).unwrap();
    assert!(results.query().dql().ends_with("n.label ASC"));
}

#[tokio::test]
async fn sorting_leaves_the_statement_text_alone() {
    let mut query = NumbersQuery::new(3);
    query.dql = "SELECT n FROM Number n\nWHERE n.label = 'a  b'  \n".into();
    let mut results = ResultSet::new(query);
    results.apply_sorting(&["n.id"]).unwrap();
    assert_eq!(
        results.query().dql(),
        "SELECT n FROM Number n\nWHERE n.label = 'a  b' ORDER BY n.id ASC"
    );
}

#[tokio::test]
async fn changing_fetch_join_collection_drops_the_cached_count() {
    let query = NumbersQuery::new(4);
    let counts = Arc::clone(&query.counts);
    let mut results = ResultSet::new(query);

    assert_eq!(results.get_total_count().await.unwrap(), 4);
    results.set_fetch_join_collection(true).unwrap();
    assert_eq!(results.get_total_count().await.unwrap(), 4);
    assert_eq!(counts.load(Ordering::SeqCst), 1);

    results.set_fetch_join_collection(false).unwrap();
    assert_eq!(results.get_total_count().await.unwrap(), 4);
    assert_eq!(counts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn paginator_selects_the_page_window() {
    let mut results = ResultSet::new(NumbersQuery::new(25));
    let mut paginator = Paginator::new(3, 5);
    results
        .apply_paginator(&mut paginator, Some(10))
        .await
        .unwrap();

    assert_eq!(paginator.item_count(), Some(25));
    assert_eq!(results.query().first_result(), Some(20));
    assert_eq!(results.query().max_results(), Some(5));
    let page = results.get_iterator(HydrationMode::Object).await.unwrap();
    assert_eq!(page, &[20, 21, 22, 23, 24]);
}

#[tokio::test]
async fn empty_when_offset_is_past_the_end() {
    let mut results = ResultSet::new(NumbersQuery::new(25));
    results.apply_paging(30, 10).unwrap();
    assert!(results.is_empty().await.unwrap());

    let mut results = ResultSet::new(NumbersQuery::new(25));
    results.apply_paging(20, 10).unwrap();
    assert!(!results.is_empty().await.unwrap());
}

#[tokio::test]
async fn count_failure_is_a_query_error() {
    let mut query = NumbersQuery::new(3);
    query.fail_count = true;
    let mut results = ResultSet::new(query);

    let err = results.get_total_count().await.unwrap_err();
    let DbError::Query { dql, source } = err else {
        panic!("expected a query error, got {err:?}");
    };
    assert_eq!(dql, "SELECT n FROM Number n");
    assert!(source.is_invalid_state());
}

#[tokio::test]
async fn native_query_pages_and_counts_through_the_connection() {
    let db = MockDb::new();
    db.respond("COUNT(*)", vec![Row::from_pairs([("count", Value::Int(3))])]);
    db.respond(
        "FROM users",
        vec![
            Row::from_pairs([("id", Value::Int(2)), ("name", Value::from("bob"))]),
            Row::from_pairs([("id", Value::Int(3)), ("name", Value::from("cid"))]),
        ],
    );
    let conn = db.connection(Platform::Postgres);

    let built = DqlBuilder::new()
        .select("u.id")
        .add_select("u.name")
        .from("users", "u")
        .where_("u.active = ?", args![true])
        .build_select()
        .unwrap();
    let mut results = ResultSet::new(NativeQuery::from_built(&conn, built));
    results.apply_paging(1, 2).unwrap();

    assert_eq!(results.get_total_count().await.unwrap(), 3);
    let rows = results.get_iterator(HydrationMode::Array).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(matches!(&rows[0], ResultItem::Row(row) if row.get("name") == Some(&Value::from("bob"))));

    let executed = db.executed();
    assert_eq!(
        executed[0].sql,
        "SELECT COUNT(*) FROM (SELECT u.id, u.name FROM users u WHERE u.active = $1) dqlkit_count"
    );
    assert_eq!(
        executed[1].sql,
        "SELECT u.id, u.name FROM users u WHERE u.active = $1 LIMIT 2 OFFSET 1"
    );
    assert_eq!(executed[1].params, vec![Value::Bool(true)]);
}

#[tokio::test]
async fn native_query_scalar_hydration() {
    let db = MockDb::new();
    db.respond(
        "FROM tags",
        vec![
            Row::from_pairs([("name", Value::from("a"))]),
            Row::from_pairs([("name", Value::from("b"))]),
        ],
    );
    let conn = db.connection(Platform::Sqlite);
    let query = NativeQuery::new(&conn, "SELECT name FROM tags WHERE owner = :owner")
        .set_parameter("owner", 7);

    let items = query.get_result(HydrationMode::Scalar).await.unwrap();
    assert_eq!(
        items,
        vec![
            ResultItem::Scalar(Value::from("a")),
            ResultItem::Scalar(Value::from("b"))
        ]
    );
    assert_eq!(
        db.statements(),
        vec!["SELECT name FROM tags WHERE owner = ?"]
    );
}

#[tokio::test]
async fn unmapped_native_query_counts_every_row() {
    let db = MockDb::new();
    db.respond("COUNT(*)", vec![Row::from_pairs([("count", Value::Int(3))])]);
    let conn = db.connection(Platform::Postgres);

    let mut results = ResultSet::new(NativeQuery::new(&conn, "SELECT name FROM tags"));
    assert_eq!(results.get_total_count().await.unwrap(), 3);
    assert_eq!(
        db.statements(),
        vec!["SELECT COUNT(*) FROM (SELECT name FROM tags) dqlkit_count"]
    );
}

#[tokio::test]
async fn sorting_a_native_query_keeps_its_literals() {
    let db = MockDb::new();
    let conn = db.connection(Platform::Postgres);
    let mut results = ResultSet::new(NativeQuery::new(
        &conn,
        "SELECT * FROM t WHERE name = 'a  b'",
    ));
    results.apply_sorting(&["id"]).unwrap();
    assert_eq!(
        results.query().dql(),
        "SELECT * FROM t WHERE name = 'a  b' ORDER BY id ASC"
    );
}
