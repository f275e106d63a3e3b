//! [`Driver`] over `tokio_postgres::Client`.

use crate::connection::{Driver, Row};
use crate::error::DriverError;
use crate::platform::Platform;
use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::error::Error;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// Postgres driver backed by a single `tokio_postgres` client.
///
/// ```ignore
/// let (client, connection) = tokio_postgres::connect(&url, tokio_postgres::NoTls).await?;
/// tokio::spawn(connection);
/// let conn = dqlkit::Connection::new(dqlkit::PgDriver::new(client));
/// ```
#[derive(Debug)]
pub struct PgDriver {
    client: tokio_postgres::Client,
}

impl PgDriver {
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    pub fn into_inner(self) -> tokio_postgres::Client {
        self.client
    }
}

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, DriverError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value: Value = row.try_get(i).map_err(|e| {
            DriverError::new(format!("cannot decode column '{}': {e}", column.name()))
        })?;
        columns.push(column.name().to_string());
        values.push(value);
    }
    Ok(Row::new(columns, values))
}

impl Driver for PgDriver {
    fn platform(&self) -> Platform {
        Platform::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let refs = param_refs(params);
        let rows = self.client.query(sql, &refs).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let refs = param_refs(params);
        Ok(self.client.execute(sql, &refs).await?)
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        let Some(db_err) = err.as_db_error() else {
            let mut driver_err = DriverError::new(err.to_string());
            if let Some(code) = err.code() {
                driver_err = driver_err.with_sqlstate(code.code());
            }
            return driver_err;
        };

        let message = match db_err.detail() {
            Some(detail) => format!("{}: {}", db_err.message(), detail),
            None => db_err.message().to_string(),
        };
        let mut driver_err = DriverError::new(message).with_sqlstate(db_err.code().code());
        if let Some(constraint) = db_err.constraint() {
            driver_err = driver_err.with_constraint(constraint);
        }
        if let Some(table) = db_err.table() {
            driver_err = driver_err.with_table(table);
        }
        if let Some(column) = db_err.column() {
            driver_err = driver_err.with_column(column);
        }
        driver_err
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(v) => match *ty {
                Type::UUID => Uuid::parse_str(v)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
                }
                _ => v.as_str().to_sql(ty, out),
            },
            Value::Timestamp(v) => v.to_sql(ty, out),
            Value::TimestampTz(v) => v.to_sql(ty, out),
            Value::Uuid(v) => v.to_sql(ty, out),
            Value::Json(v) => v.to_sql(ty, out),
            Value::List(items) => items.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if let Kind::Array(_) = ty.kind() {
            return Ok(Value::List(Vec::<Value>::from_sql(ty, raw)?));
        }
        Ok(match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            ref other if <String as FromSql>::accepts(other) => {
                Value::Text(String::from_sql(ty, raw)?)
            }
            ref other => {
                return Err(format!("unsupported column type {other}").into());
            }
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}
