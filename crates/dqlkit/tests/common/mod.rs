//! In-memory scripted driver shared by the integration tests.
#![allow(dead_code)]

use dqlkit::{Connection, ConnectionConfig, Driver, DriverError, Entity, DbResult, Platform, Row, Value};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Executed {
    pub session: u32,
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
struct UniqueIndex {
    table: String,
    name: String,
    columns: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredRow {
    session: u32,
    committed: bool,
    table: String,
    values: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct ScriptedError {
    pattern: String,
    error: DriverError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct State {
    sessions: u32,
    executed: Vec<Executed>,
    indexes: Vec<UniqueIndex>,
    rows: Vec<StoredRow>,
    errors: Vec<ScriptedError>,
    responses: Vec<(String, Vec<Row>)>,
    next_id: i64,
    last_ids: HashMap<u32, i64>,
}

/// A fake database; every [`MockDriver`] created from it sees the same rows.
#[derive(Debug, Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<State>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver with its own session (transaction scope).
    pub fn driver(&self, platform: Platform) -> MockDriver {
        let mut state = self.state.lock().unwrap();
        state.sessions += 1;
        MockDriver {
            platform,
            session: state.sessions,
            db: self.clone(),
        }
    }

    pub fn connection(&self, platform: Platform) -> Connection<MockDriver> {
        Connection::new(self.driver(platform))
    }

    pub fn connection_with(&self, platform: Platform, config: ConnectionConfig) -> Connection<MockDriver> {
        Connection::with_config(self.driver(platform), config)
    }

    pub fn add_unique_index(&self, table: &str, name: &str, columns: &[&str]) -> &Self {
        self.state.lock().unwrap().indexes.push(UniqueIndex {
            table: table.to_string(),
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    /// Fail the next `times` statements containing `pattern` with `error`.
    pub fn fail(&self, pattern: &str, error: DriverError, times: usize) -> &Self {
        self.state.lock().unwrap().errors.push(ScriptedError {
            pattern: pattern.to_string(),
            error,
            remaining: times,
        });
        self
    }

    /// Answer queries containing `pattern` with `rows`.
    pub fn respond(&self, pattern: &str, rows: Vec<Row>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((pattern.to_string(), rows));
        self
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    pub fn statements_of(&self, session: u32) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|e| e.session == session)
            .map(|e| e.sql)
            .collect()
    }

    /// Committed rows of `table`.
    pub fn committed_rows(&self, table: &str) -> Vec<BTreeMap<String, Value>> {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| r.committed && r.table == table)
            .map(|r| r.values.clone())
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| r.table == table)
            .count()
    }
}

#[derive(Debug)]
pub struct MockDriver {
    platform: Platform,
    session: u32,
    db: MockDb,
}

impl MockDriver {
    pub fn session(&self) -> u32 {
        self.session
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<(), DriverError> {
        let mut state = self.db.state.lock().unwrap();
        state.executed.push(Executed {
            session: self.session,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(scripted) = state
            .errors
            .iter_mut()
            .find(|e| e.remaining > 0 && sql.contains(&e.pattern))
        {
            scripted.remaining -= 1;
            return Err(scripted.error.clone());
        }
        Ok(())
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let re = Regex::new(r#"(?i)INSERT INTO\s+[`"]?(\w+)[`"]?\s*\(([^)]*)\)"#).unwrap();
        let Some(caps) = re.captures(sql) else {
            return Ok(1);
        };
        let table = caps[1].to_string();
        let values: BTreeMap<String, Value> = caps[2]
            .split(',')
            .map(|c| c.trim().trim_matches(['`', '"']).to_string())
            .zip(params.iter().cloned())
            .collect();

        let mut state = self.db.state.lock().unwrap();
        for index in state.indexes.iter().filter(|i| i.table == table) {
            let key: Vec<&Value> = index
                .columns
                .iter()
                .filter_map(|c| values.get(c))
                .collect();
            if key.len() != index.columns.len() || key.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = state.rows.iter().any(|row| {
                row.table == table
                    && index
                        .columns
                        .iter()
                        .zip(&key)
                        .all(|(c, v)| row.values.get(c) == Some(*v))
            });
            if clash {
                return Err(self.unique_violation(&table, index, &key));
            }
        }

        state.next_id += 1;
        let id = state.next_id;
        state.last_ids.insert(self.session, id);
        state.rows.push(StoredRow {
            session: self.session,
            committed: false,
            table,
            values,
        });
        Ok(1)
    }

    fn unique_violation(&self, table: &str, index: &UniqueIndex, key: &[&Value]) -> DriverError {
        let plain: Vec<String> = key
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect();
        match self.platform {
            Platform::MySql => DriverError::new(format!(
                "SQLSTATE[23000]: Integrity constraint violation: 1062 Duplicate entry '{}' for key '{}'",
                plain.join("-"),
                index.name
            ))
            .with_sqlstate("23000")
            .with_code(1062),
            Platform::Postgres => DriverError::new(format!(
                "duplicate key value violates unique constraint \"{}\": Key ({})=({}) already exists.",
                index.name,
                index.columns.join(", "),
                plain.join(", ")
            ))
            .with_sqlstate("23505")
            .with_constraint(index.name.clone())
            .with_table(table),
            Platform::Sqlite => DriverError::new(format!(
                "UNIQUE constraint failed: {}",
                index
                    .columns
                    .iter()
                    .map(|c| format!("{table}.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .with_code(19),
        }
    }

    fn end_transaction(&self, commit: bool) {
        let mut state = self.db.state.lock().unwrap();
        let session = self.session;
        if commit {
            for row in state.rows.iter_mut().filter(|r| r.session == session) {
                row.committed = true;
            }
        } else {
            state.rows.retain(|r| r.session != session || r.committed);
        }
    }

    fn introspect(&self, sql: &str) -> Option<Vec<Row>> {
        let quoted = Regex::new(r#"[`"(]([\w.]+)[`")]*\s*$"#).unwrap();
        let target = quoted.captures(sql).map(|c| c[1].to_string())?;
        let state = self.db.state.lock().unwrap();

        if sql.starts_with("SHOW INDEX FROM") {
            let mut rows = Vec::new();
            for index in state.indexes.iter().filter(|i| i.table == target) {
                for column in &index.columns {
                    rows.push(Row::from_pairs([
                        ("Table", Value::from(target.as_str())),
                        ("Non_unique", Value::Int(0)),
                        ("Key_name", Value::from(index.name.as_str())),
                        ("Column_name", Value::from(column.as_str())),
                    ]));
                }
            }
            return Some(rows);
        }
        if sql.starts_with("PRAGMA index_list") {
            let rows = state
                .indexes
                .iter()
                .filter(|i| i.table == target)
                .map(|i| {
                    Row::from_pairs([
                        ("name", Value::from(i.name.as_str())),
                        ("unique", Value::Int(1)),
                        ("origin", Value::from("c")),
                    ])
                })
                .collect();
            return Some(rows);
        }
        if sql.starts_with("PRAGMA index_info") {
            let rows = state
                .indexes
                .iter()
                .filter(|i| i.name == target)
                .flat_map(|i| i.columns.iter().enumerate())
                .map(|(seqno, column)| {
                    Row::from_pairs([
                        ("seqno", Value::Int(seqno as i64)),
                        ("name", Value::from(column.as_str())),
                    ])
                })
                .collect();
            return Some(rows);
        }
        None
    }
}

impl Driver for MockDriver {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        tokio::task::yield_now().await;
        self.record(sql, params)?;

        if let Some(rows) = self.introspect(sql) {
            return Ok(rows);
        }
        if sql.contains("LAST_INSERT_ID()") || sql.contains("last_insert_rowid()") || sql.contains("lastval()") {
            let state = self.db.state.lock().unwrap();
            let id = state.last_ids.get(&self.session).copied();
            return Ok(vec![Row::from_pairs([("id", Value::from(id))])]);
        }

        let state = self.db.state.lock().unwrap();
        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        tokio::task::yield_now().await;
        self.record(sql, params)?;

        let verb = sql.trim_start().to_ascii_uppercase();
        if verb.starts_with("INSERT") {
            self.insert(sql, params)
        } else if verb == "COMMIT" {
            self.end_transaction(true);
            Ok(0)
        } else if verb == "ROLLBACK" {
            self.end_transaction(false);
            Ok(0)
        } else if verb.starts_with("UPDATE") || verb.starts_with("DELETE") {
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

/// A tag entity: `id` is generated, `name` is unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: Option<i64>,
    pub name: String,
    pub label: Option<String>,
}

impl Tag {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            label: None,
        }
    }
}

impl Entity for Tag {
    fn class_name(&self) -> &str {
        "Tag"
    }

    fn field_value(&self, field: &str) -> Value {
        match field {
            "id" => Value::from(self.id),
            "name" => Value::from(self.name.as_str()),
            "label" => Value::from(self.label.clone()),
            _ => Value::Null,
        }
    }

    fn set_field_value(&mut self, field: &str, value: Value) -> DbResult<()> {
        match field {
            "id" => self.id = value.as_i64(),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
            "label" => self.label = value.as_str().map(str::to_string),
            other => {
                return Err(dqlkit::DbError::invalid_argument(format!("Tag has no field {other}")));
            }
        }
        Ok(())
    }
}

pub const TAG_METADATA: &str = r#"[
    {
        "name": "Tag",
        "table_name": "tags",
        "fields": [
            { "field_name": "id", "column_name": "id", "type": "integer", "id": true },
            { "field_name": "name", "column_name": "name", "unique": true },
            { "field_name": "label", "column_name": "label", "nullable": true }
        ],
        "id_generator": { "strategy": "identity" }
    }
]"#;
