//! MySQL connector backed by `mysql_async`.
//!
//! `:name` placeholders are rewritten to positional `?` markers and bound
//! through the binary protocol. Result cells arrive as driver values and
//! are converted to JSON, with byte payloads decoded as UTF-8 text when
//! possible.

use crate::config::{SqlBackend, StatementPolicy};
use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::security::check_statement;
use crate::sql::{rewrite_placeholders, PlaceholderStyle};
use crate::types::{NativeResult, ParamValue, Params, QueryRequest, Row, SourceKind};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts};
use serde_json::Value as Json;

/// Connector for the `mysql` kind.
pub struct MySqlConnector {
    settings: SqlBackend,
    policy: StatementPolicy,
}

impl MySqlConnector {
    /// Connector for the given backend settings and statement policy.
    pub fn new(settings: SqlBackend, policy: StatementPolicy) -> Self {
        Self { settings, policy }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::MySql
    }

    fn check(&self, request: &QueryRequest) -> Result<()> {
        check_statement(&self.policy, &request.query)
    }

    async fn connect(&self) -> Result<Box<dyn Handle>> {
        let opts = Opts::from_url(&self.settings.url)
            .map_err(|e| Error::validation(format!("invalid mysql url: {e}")))?;

        let conn = tokio::time::timeout(self.settings.connect_timeout(), Conn::new(opts))
            .await
            .map_err(|_| {
                Error::transient(format!(
                    "mysql connect timed out after {}ms",
                    self.settings.connect_timeout_ms
                ))
            })?
            .map_err(|e| map_mysql_error("connect failed", e))?;

        Ok(Box::new(MySqlHandle { conn: Some(conn) }))
    }
}

struct MySqlHandle {
    conn: Option<Conn>,
}

impl MySqlHandle {
    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::internal("mysql connection already closed"))
    }
}

#[async_trait]
impl Handle for MySqlHandle {
    async fn run(&mut self, query: &str, params: &Params) -> Result<NativeResult> {
        let rewritten = rewrite_placeholders(query, params, PlaceholderStyle::Positional)?;

        let mut bound: Vec<mysql_async::Value> = Vec::with_capacity(rewritten.order.len());
        for name in &rewritten.order {
            let value = params.get(name).ok_or_else(|| {
                Error::internal(format!("parameter '{name}' missing after rewrite"))
            })?;
            bound.push(param_to_mysql(value));
        }

        let conn = self.conn_mut()?;
        let mysql_rows: Vec<mysql_async::Row> = conn
            .exec(rewritten.sql.as_str(), bound)
            .await
            .map_err(|e| map_mysql_error("query failed", e))?;

        let columns: Option<Vec<String>> = mysql_rows.first().map(|row| {
            row.columns_ref()
                .iter()
                .map(|c| c.name_str().to_string())
                .collect()
        });

        let rows: Vec<Row> = mysql_rows
            .iter()
            .map(|row| {
                let mut out = Row::new();
                for (i, column) in row.columns_ref().iter().enumerate() {
                    let value: mysql_async::Value =
                        row.get(i).unwrap_or(mysql_async::Value::NULL);
                    out.insert(column.name_str().to_string(), mysql_value_to_json(value));
                }
                out
            })
            .collect();

        Ok(match columns {
            Some(columns) => NativeResult::with_columns(columns, rows),
            None => NativeResult::rows(rows),
        })
    }

    async fn is_valid(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect()
                .await
                .map_err(|e| map_mysql_error("disconnect failed", e))?;
        }
        Ok(())
    }
}

fn param_to_mysql(value: &ParamValue) -> mysql_async::Value {
    match value {
        ParamValue::Null => mysql_async::Value::NULL,
        ParamValue::Bool(b) => mysql_async::Value::from(*b),
        ParamValue::Int(i) => mysql_async::Value::from(*i),
        ParamValue::Float(f) => mysql_async::Value::from(*f),
        ParamValue::String(s) => mysql_async::Value::from(s.clone()),
        ParamValue::Json(v) => mysql_async::Value::from(v.to_string()),
    }
}

fn mysql_value_to_json(value: mysql_async::Value) -> Json {
    match value {
        mysql_async::Value::NULL => Json::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Json::String(text),
            Err(raw) => serde_json::to_value(raw.into_bytes()).unwrap_or(Json::Null),
        },
        mysql_async::Value::Int(n) => Json::from(n),
        mysql_async::Value::UInt(n) => Json::from(n),
        mysql_async::Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        mysql_async::Value::Double(d) => serde_json::Number::from_f64(d)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                Json::String(format!("{year:04}-{month:02}-{day:02}"))
            } else {
                Json::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{min:02}:{sec:02}.{micro:06}"
                ))
            }
        }
        mysql_async::Value::Time(negative, days, hour, min, sec, micro) => {
            let sign = if negative { "-" } else { "" };
            let hours = u32::from(days) * 24 + u32::from(hour);
            Json::String(format!("{sign}{hours:02}:{min:02}:{sec:02}.{micro:06}"))
        }
    }
}

/// Server error codes safe to retry: connection limits, shutdown in
/// progress, lock wait timeouts and deadlocks.
fn is_transient_mysql_code(code: u16) -> bool {
    matches!(code, 1040 | 1053 | 1077 | 1205 | 1213 | 2006 | 2013)
}

fn map_mysql_error(context: &str, error: mysql_async::Error) -> Error {
    match &error {
        mysql_async::Error::Server(server) => {
            let message = format!("{context}: {} (code {})", server.message, server.code);
            if is_transient_mysql_code(server.code) {
                Error::transient_with(message, error)
            } else {
                Error::permanent_with(message, error)
            }
        }
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => {
            Error::transient_with(format!("{context}: {error}"), error)
        }
        _ => Error::permanent_with(format!("{context}: {error}"), error),
    }
}
