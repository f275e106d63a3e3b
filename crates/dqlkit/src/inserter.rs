//! Race-tolerant inserts of entities guarded by unique constraints.
//!
//! [`NonLockingUniqueInserter`] takes no locks. It inserts the row in a short
//! transaction and lets the database reject a concurrent duplicate: the
//! losing writer rolls back and gets `None` instead of an error.
//!
//! ```ignore
//! let inserter = NonLockingUniqueInserter::new(&conn, &registry, DirectSession::new(&conn, &registry));
//! match inserter.persist(tag).await? {
//!     Some(tag) => println!("created {}", tag.field_value("id")),
//!     None => println!("someone else created it first"),
//! }
//! ```

use crate::connection::{Connection, Driver, StatementContext};
use crate::error::{DbError, DbResult};
use crate::metadata::{ClassMetadata, IdGenerator, JoinColumn, MetadataRegistry};
use crate::platform::Platform;
use crate::value::Value;
use std::future::Future;

/// An object mapped by [`ClassMetadata`].
///
/// Values are addressed by field name. For an owning to-one association the
/// value is the related entity's identifier (a [`Value::List`] for composite
/// join columns).
pub trait Entity: Send + Sync {
    /// Name of the entity's class in the [`MetadataRegistry`].
    fn class_name(&self) -> &str;

    fn field_value(&self, field: &str) -> Value;

    fn set_field_value(&mut self, field: &str, value: Value) -> DbResult<()>;
}

/// Unit of work receiving inserted entities.
pub trait EntitySession<E: Entity>: Send + Sync {
    /// Attach `entity`, returning the managed instance.
    fn merge(&self, entity: E) -> impl Future<Output = DbResult<E>> + Send;

    /// Write pending changes of `entity` only.
    fn flush(&self, entity: &E) -> impl Future<Output = DbResult<()>> + Send;
}

/// A session without identity map: `merge` hands the entity back and
/// `flush` updates its non-identifier columns by identifier.
#[derive(Debug)]
pub struct DirectSession<'a, D> {
    conn: &'a Connection<D>,
    registry: &'a MetadataRegistry,
}

impl<'a, D: Driver> DirectSession<'a, D> {
    pub fn new(conn: &'a Connection<D>, registry: &'a MetadataRegistry) -> Self {
        Self { conn, registry }
    }
}

impl<D: Driver, E: Entity> EntitySession<E> for DirectSession<'_, D> {
    async fn merge(&self, entity: E) -> DbResult<E> {
        Ok(entity)
    }

    async fn flush(&self, entity: &E) -> DbResult<()> {
        let class = self.registry.get(entity.class_name())?;
        let platform = self.conn.platform();

        let (criteria, assignments): (Vec<_>, Vec<_>) = entity_columns(class, entity)
            .into_iter()
            .partition(|(_, _, is_id)| *is_id);
        if assignments.is_empty() {
            return Ok(());
        }
        if criteria.is_empty() {
            return Err(DbError::configuration(format!(
                "class '{}' has no identifier to flush by",
                class.name
            )));
        }

        let mut n = 0;
        let mut values = Vec::with_capacity(assignments.len() + criteria.len());
        let mut set_sql = Vec::with_capacity(assignments.len());
        for (column, value, _) in assignments {
            n += 1;
            set_sql.push(format!(
                "{} = {}",
                platform.quote_identifier(&column),
                platform.placeholder(n)
            ));
            values.push(value);
        }
        let mut where_sql = Vec::with_capacity(criteria.len());
        for (column, value, _) in criteria {
            n += 1;
            where_sql.push(format!(
                "{} = {}",
                platform.quote_identifier(&column),
                platform.placeholder(n)
            ));
            values.push(value);
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            platform.quote_identifier(&class.table_name),
            set_sql.join(", "),
            where_sql.join(" AND ")
        );
        self.conn
            .prepare(sql)
            .bind_all(values)
            .with_context(StatementContext::table(&class.table_name))
            .execute()
            .await?;
        Ok(())
    }
}

/// Every column of `entity` with its value, flagged when it is part of the
/// identifier: fields first, then owning to-one join columns.
fn entity_columns(class: &ClassMetadata, entity: &impl Entity) -> Vec<(String, Value, bool)> {
    let mut columns: Vec<(String, Value, bool)> = class
        .fields
        .iter()
        .map(|f| (f.column_name.clone(), entity.field_value(&f.field_name), f.id))
        .collect();
    for association in class
        .associations
        .iter()
        .filter(|a| a.kind.is_to_one() && a.has_join_columns())
    {
        let value = entity.field_value(&association.field_name);
        for (column, value) in join_column_values(&association.join_columns, value) {
            columns.push((column, value, association.id));
        }
    }
    columns
}

fn join_column_values(
    join_columns: &[JoinColumn],
    value: Value,
) -> Vec<(String, Value)> {
    match value {
        Value::List(values) if join_columns.len() > 1 => join_columns
            .iter()
            .map(|jc| jc.name.clone())
            .zip(values)
            .collect(),
        value => join_columns
            .iter()
            .take(1)
            .map(|jc| (jc.name.clone(), value.clone()))
            .collect(),
    }
}

/// The INSERT statement written for one entity.
///
/// Only the columns the row cannot exist without are written: assigned
/// identifiers, non-nullable and unique fields, non-nullable owning join
/// columns and the discriminator. The rest is left to the session flush.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueInsertPlan {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub sql: String,
}

impl UniqueInsertPlan {
    pub fn new(platform: Platform, class: &ClassMetadata, entity: &impl Entity) -> DbResult<Self> {
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for field in &class.fields {
            let include = if field.id {
                !class.uses_id_generator()
            } else {
                !field.nullable || field.unique
            };
            if include {
                columns.push(field.column_name.clone());
                values.push(entity.field_value(&field.field_name));
            }
        }

        for association in class
            .associations
            .iter()
            .filter(|a| a.owning_side && a.kind.is_to_one() && a.has_join_columns())
        {
            if association.join_columns.iter().all(|jc| jc.nullable) && !association.id {
                continue;
            }
            let value = entity.field_value(&association.field_name);
            for (column, value) in join_column_values(&association.join_columns, value) {
                columns.push(column);
                values.push(value);
            }
        }

        if let (Some(discriminator), Some(value)) =
            (&class.discriminator_column, &class.discriminator_value)
        {
            if !columns.contains(&discriminator.name) {
                columns.push(discriminator.name.clone());
                values.push(Value::from(value.as_str()));
            }
        }

        if columns.is_empty() {
            return Err(DbError::configuration(format!(
                "class '{}' has no required or unique columns to insert",
                class.name
            )));
        }

        let quoted: Vec<String> = columns
            .iter()
            .map(|c| platform.quote_identifier(c))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len())
            .map(|n| platform.placeholder(n))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            platform.quote_identifier(&class.table_name),
            quoted.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            table: class.table_name.clone(),
            columns,
            values,
            sql,
        })
    }
}

/// Inserts entities without locking, treating a unique violation as
/// "already exists".
#[derive(Debug)]
pub struct NonLockingUniqueInserter<'a, D, S> {
    conn: &'a Connection<D>,
    registry: &'a MetadataRegistry,
    session: S,
}

impl<'a, D: Driver, S> NonLockingUniqueInserter<'a, D, S> {
    pub fn new(conn: &'a Connection<D>, registry: &'a MetadataRegistry, session: S) -> Self {
        Self {
            conn,
            registry,
            session,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Insert `entity` in its own transaction.
    ///
    /// Returns the merged entity, or `None` when a row with the same unique
    /// values already exists. Any other failure is rolled back and returned.
    pub async fn persist<E>(&self, entity: E) -> DbResult<Option<E>>
    where
        E: Entity,
        S: EntitySession<E>,
    {
        let class = self.registry.get(entity.class_name())?;
        let plan = UniqueInsertPlan::new(self.conn.platform(), class, &entity)?;

        self.conn.begin_transaction().await?;
        match self.insert(class, &plan, entity).await {
            Ok(merged) => Ok(Some(merged)),
            Err(err) => {
                if let Err(rollback_err) = self.conn.rollback().await {
                    tracing::warn!(
                        target: "dqlkit.sql",
                        table = %plan.table,
                        error = %rollback_err,
                        "rollback after failed insert failed"
                    );
                }
                if self.is_duplicate(&err) {
                    tracing::debug!(
                        target: "dqlkit.sql",
                        table = %plan.table,
                        "row already exists, insert skipped"
                    );
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn insert<E>(&self, class: &ClassMetadata, plan: &UniqueInsertPlan, mut entity: E) -> DbResult<E>
    where
        E: Entity,
        S: EntitySession<E>,
    {
        self.conn
            .prepare(plan.sql.as_str())
            .bind_all(plan.values.iter().cloned())
            .with_context(StatementContext::table(&plan.table))
            .execute()
            .await?;

        if let IdGenerator::Identity { sequence } = &class.id_generator {
            let id = self.conn.last_insert_id(sequence.as_deref()).await?;
            let id_field = class.identifier_field_names().first().map(|f| f.to_string());
            match id_field {
                Some(field) => entity.set_field_value(&field, id)?,
                None => {
                    return Err(DbError::configuration(format!(
                        "class '{}' generates identifiers but has no identifier field",
                        class.name
                    )));
                }
            }
        }

        let merged = self.session.merge(entity).await?;
        self.session.flush(&merged).await?;
        self.conn.commit().await?;
        Ok(merged)
    }

    fn is_duplicate(&self, err: &DbError) -> bool {
        err.is_duplicate_entry()
            || err
                .driver_error()
                .is_some_and(|e| self.conn.platform().is_unique_violation(e))
    }
}
