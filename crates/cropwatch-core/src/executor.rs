//! Runs SQL text against the detection database and returns rows as JSON objects.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow, PgValueFormat};
use sqlx::query::Query;
use sqlx::{Column, Decode, Postgres, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::debug;

use crate::db::DbPool;

/// One result row: column name → value, in column order.
pub type QueryRow = Map<String, Value>;

/// Positional parameter. The N-th entry of a parameter slice (`paramN`,
/// zero-based) binds to the Postgres placeholder `$N+1`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        QueryParam::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        QueryParam::Text(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        QueryParam::Int(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        QueryParam::Float(value)
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        QueryParam::Bool(value)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(value: DateTime<Utc>) -> Self {
        QueryParam::Timestamp(value)
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("column '{column}' could not be decoded: {message}")]
    Decode { column: String, message: String },
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<QueryRow>, QueryError>;
}

#[derive(Clone)]
pub struct PgQueryExecutor {
    pool: DbPool,
}

impl PgQueryExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<QueryRow>, QueryError> {
        // Unparameterized statements go over the simple query protocol, which
        // returns every column as text and so renders any column type.
        let rows = if params.is_empty() {
            sqlx::raw_sql(sql).fetch_all(&self.pool).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            query.fetch_all(&self.pool).await?
        };

        debug!(rows = rows.len(), params = params.len(), "query executed");
        rows.iter().map(row_to_json).collect()
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &QueryParam,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(value) => query.bind(*value),
        QueryParam::Int(value) => query.bind(*value),
        QueryParam::Float(value) => query.bind(*value),
        QueryParam::Text(value) => query.bind(value.clone()),
        QueryParam::Timestamp(value) => query.bind(*value),
    }
}

fn row_to_json(row: &PgRow) -> Result<QueryRow, QueryError> {
    let mut object = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name()).map_err(
            |err| QueryError::Decode {
                column: column.name().to_string(),
                message: err.to_string(),
            },
        )?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    if matches!(raw.format(), PgValueFormat::Text) {
        let text = <&str as Decode<Postgres>>::decode(raw).map_err(sqlx::Error::Decode)?;
        return Ok(text_to_json(type_name, text));
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "FLOAT4" => float_to_json(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => float_to_json(row.try_get::<f64, _>(index)?),
        "NUMERIC" => text_to_json("NUMERIC", &row.try_get::<Decimal, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            Value::String(row.try_get::<String, _>(index)?)
        }
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "TIMESTAMP" => Value::String(row.try_get::<NaiveDateTime, _>(index)?.to_string()),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        other => {
            return Err(sqlx::Error::Decode(
                format!("unsupported column type {other}").into(),
            ))
        }
    };
    Ok(value)
}

fn text_to_json(type_name: &str, text: &str) -> Value {
    match type_name {
        "BOOL" => Value::Bool(text == "t"),
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => {
            if let Ok(int) = text.parse::<i64>() {
                return Value::from(int);
            }
            match text.parse::<f64>() {
                Ok(float) => float_to_json(float),
                Err(_) => Value::String(text.to_string()),
            }
        }
        "JSON" | "JSONB" => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        "TIMESTAMPTZ" => DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map(|dt| Value::String(dt.with_timezone(&Utc).to_rfc3339()))
            .unwrap_or_else(|_| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

// NaN and infinities have no JSON number form.
fn float_to_json(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}
