//! PostgreSQL connector backed by `tokio-postgres`.
//!
//! Parameters are bound through prepared statements; `:name` placeholders
//! are rewritten to `$n` before preparation. Result cells are converted to
//! JSON values by column type, with temporal and UUID types rendered as
//! strings.

use crate::config::{SqlBackend, StatementPolicy};
use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::security::check_statement;
use crate::sql::{rewrite_placeholders, PlaceholderStyle};
use crate::types::{NativeResult, ParamValue, Params, QueryRequest, Row, SourceKind};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value as Json;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::NoTls;

/// Connector for the `postgresql` kind.
pub struct PostgresConnector {
    settings: SqlBackend,
    policy: StatementPolicy,
}

impl PostgresConnector {
    /// Connector for the given backend settings and statement policy.
    pub fn new(settings: SqlBackend, policy: StatementPolicy) -> Self {
        Self { settings, policy }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Postgres
    }

    fn check(&self, request: &QueryRequest) -> Result<()> {
        check_statement(&self.policy, &request.query)
    }

    async fn connect(&self) -> Result<Box<dyn Handle>> {
        let connected = tokio::time::timeout(
            self.settings.connect_timeout(),
            tokio_postgres::connect(&self.settings.url, NoTls),
        )
        .await
        .map_err(|_| {
            Error::transient(format!(
                "postgres connect timed out after {}ms",
                self.settings.connect_timeout_ms
            ))
        })?;

        let (client, connection) = connected.map_err(|e| map_pg_error("connect failed", e))?;

        // The connection object drives backend I/O until the client drops.
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(%error, "postgres connection task ended");
            }
        });

        Ok(Box::new(PostgresHandle { client }))
    }
}

struct PostgresHandle {
    client: tokio_postgres::Client,
}

#[async_trait]
impl Handle for PostgresHandle {
    async fn run(&mut self, query: &str, params: &Params) -> Result<NativeResult> {
        let rewritten = rewrite_placeholders(query, params, PlaceholderStyle::Numbered)?;

        let statement = self
            .client
            .prepare(&rewritten.sql)
            .await
            .map_err(|e| map_pg_error("prepare failed", e))?;

        let mut bound: Vec<Box<dyn ToSql + Sync + Send>> =
            Vec::with_capacity(rewritten.order.len());
        for name in &rewritten.order {
            let value = params.get(name).ok_or_else(|| {
                Error::internal(format!("parameter '{name}' missing after rewrite"))
            })?;
            bound.push(param_to_sql(value));
        }
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pg_rows = self
            .client
            .query(&statement, &refs)
            .await
            .map_err(|e| map_pg_error("query failed", e))?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            rows.push(pg_row_to_row(pg_row)?);
        }

        Ok(NativeResult::with_columns(columns, rows))
    }

    async fn is_valid(&mut self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client terminates the connection task.
        Ok(())
    }
}

/// Box a parameter for binding. Concrete driver types carry the SQL type;
/// null binds as an absent text value.
fn param_to_sql(value: &ParamValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        ParamValue::Null => Box::new(Option::<String>::None),
        ParamValue::Bool(b) => Box::new(*b),
        ParamValue::Int(i) => Box::new(*i),
        ParamValue::Float(f) => Box::new(*f),
        ParamValue::String(s) => Box::new(s.clone()),
        ParamValue::Json(v) => Box::new(v.clone()),
    }
}

fn pg_row_to_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = pg_cell_to_json(row, idx, column.type_()).map_err(|e| {
            Error::permanent_with(format!("failed to decode column '{}'", column.name()), e)
        })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn pg_cell_to_json(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<Json, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Json::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Json::from(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Json::from(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Json::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(float_to_json),
        Type::NUMERIC => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)?
            .map(decimal_to_json),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Json>>(idx)?,
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| Json::String(v.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
            .map(|v| Json::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| Json::String(v.to_rfc3339())),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .map(|v| Json::String(v.to_string())),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)?
            .map(|v| Json::String(v.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .and_then(|v| serde_json::to_value(v).ok()),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Json::String),
    };
    Ok(value.unwrap_or(Json::Null))
}

fn float_to_json(v: f64) -> Json {
    serde_json::Number::from_f64(v)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn decimal_to_json(v: rust_decimal::Decimal) -> Json {
    match v.to_f64().and_then(serde_json::Number::from_f64) {
        Some(n) => Json::Number(n),
        None => Json::String(v.to_string()),
    }
}

/// SQLSTATE classes indicating a retry-safe condition: connection
/// exceptions, transaction rollbacks (deadlock, serialization),
/// insufficient resources and operator intervention.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("08") | Some("40") | Some("53") | Some("57"))
}

fn map_pg_error(context: &str, error: tokio_postgres::Error) -> Error {
    if let Some(db) = error.as_db_error() {
        let message = format!("{context}: {} ({})", db.message(), db.code().code());
        if is_transient_sqlstate(db.code().code()) {
            Error::transient_with(message, error)
        } else {
            Error::permanent_with(message, error)
        }
    } else if error.is_closed() {
        Error::transient_with(format!("{context}: connection closed"), error)
    } else {
        // Socket-level failures with no server response are retry-safe.
        Error::transient_with(format!("{context}: {error}"), error)
    }
}
