//! Request and result model shared by every connector.
//!
//! A [`QueryRequest`] arrives as a decoded JSON-like structure from an
//! upstream handler; the matching [`QueryResult`] is handed back for
//! re-encoding. Both are plain values: no request state persists across
//! calls.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};
use std::fmt;

/// A single normalized row: column name to JSON value, in column order.
pub type Row = Map<String, Json>;

/// Data-source kind selecting the connector for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Generic SQL, served by the deployment's default relational backend.
    Sql,
    /// PostgreSQL.
    #[serde(rename = "postgresql")]
    Postgres,
    /// MySQL.
    #[serde(rename = "mysql")]
    MySql,
    /// Document-oriented store queried with a selector document.
    DocumentStore,
    /// Generic JSON-over-HTTP API.
    HttpApi,
}

impl SourceKind {
    /// Wire name of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::DocumentStore => "document-store",
            Self::HttpApi => "http-api",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sql" => Some(Self::Sql),
            "postgresql" | "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "document-store" => Some(Self::DocumentStore),
            "http-api" => Some(Self::HttpApi),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameter value bound into a query through the backend's native
/// binding mechanism. Never interpolated into query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// SQL NULL / JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    String(String),
    /// Structured value, passed through as JSON.
    Json(Json),
}

impl ParamValue {
    /// Whether this is the null value.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON representation, used by the document and HTTP connectors.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::String(s) => Json::String(s.clone()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Plain-text rendering, used for URL substitution.
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Json> for ParamValue {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// Ordered name-to-value parameter mapping.
///
/// Serialized as a JSON object; insertion order is preserved so positional
/// rewriting is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any existing value under the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, ParamValue)>> for Params {
    fn from(entries: Vec<(String, ParamValue)>) -> Self {
        let mut params = Self::new();
        for (name, value) in entries {
            params.set(name, value);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = Params;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter names to values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Params, A::Error> {
                let mut params = Params::new();
                while let Some((name, value)) = access.next_entry::<String, ParamValue>()? {
                    params.set(name, value);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_map(ParamsVisitor)
    }
}

/// Immutable query submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Which connector serves this request.
    #[serde(rename = "dataSourceKind")]
    pub source: SourceKind,
    /// Opaque query text, interpreted only by the chosen connector.
    pub query: String,
    /// Ordered parameters, bound by the connector.
    #[serde(default)]
    pub params: Params,
    /// Opaque widget identifier, echoed in metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    /// Opaque tenant identifier, used for pool partitioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl QueryRequest {
    /// Create a request for the given kind and query text.
    pub fn new(source: SourceKind, query: impl Into<String>) -> Self {
        Self {
            source,
            query: query.into(),
            params: Params::new(),
            widget_id: None,
            tenant_id: None,
        }
    }

    /// Add a bound parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.set(name, value);
        self
    }

    /// Set the tenant identifier.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the widget identifier.
    pub fn with_widget(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }
}

/// Raw result produced by a connector before normalization.
#[derive(Debug, Clone, Default)]
pub struct NativeResult {
    /// Column order declared by the backend, when it has one. Backends
    /// without a declared order leave this unset and the normalizer derives
    /// order from the rows themselves.
    pub columns: Option<Vec<String>>,
    /// Rows as JSON objects keyed by column name.
    pub rows: Vec<Row>,
}

impl NativeResult {
    /// Result with rows and no declared column order.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            columns: None,
            rows,
        }
    }

    /// Result with a declared column order.
    pub fn with_columns(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns: Some(columns),
            rows,
        }
    }
}

/// Normalized tabular data: uniform rows under a single column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Column names defining row field order.
    pub columns: Vec<String>,
    /// Rows whose key sets equal `columns`.
    pub rows: Vec<Row>,
}

/// Echo of the originating request, attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Requested data-source kind.
    pub data_source: SourceKind,
    /// Original query text.
    pub query: String,
    /// Original parameters.
    pub params: Params,
}

impl From<&QueryRequest> for ResultMetadata {
    fn from(request: &QueryRequest) -> Self {
        Self {
            data_source: request.source,
            query: request.query.clone(),
            params: request.params.clone(),
        }
    }
}

/// Immutable result returned to the caller.
///
/// Exactly one of `data` / `error` is populated. When `data` is present,
/// `row_count == data.len()` and every row's key set equals `columns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Whether the query succeeded.
    pub success: bool,
    /// Column names, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Normalized rows, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,
    /// Number of rows, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Wall-clock execution time, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Failure description, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echo of the originating request.
    pub metadata: ResultMetadata,
}

impl QueryResult {
    /// Successful result from normalized tabular data.
    pub fn ok(table: Table, execution_time_ms: u64, metadata: ResultMetadata) -> Self {
        let row_count = table.rows.len();
        Self {
            success: true,
            columns: Some(table.columns),
            data: Some(table.rows),
            row_count: Some(row_count),
            execution_time_ms: Some(execution_time_ms),
            error: None,
            metadata,
        }
    }

    /// Failed result carrying a human-readable description.
    pub fn fail(error: impl fmt::Display, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            columns: None,
            data: None,
            row_count: None,
            execution_time_ms: None,
            error: Some(error.to_string()),
            metadata,
        }
    }
}
