//! HTTP-API connector.
//!
//! The query text is a URL template; `{name}` segments are filled from
//! params and remaining params become query-string pairs. JSON array
//! responses map to rows and object keys define columns. Non-2xx
//! responses fail with the status code attached; 5xx and throttling
//! statuses are treated as transient.

use crate::config::HttpBackend;
use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::normalize::flatten_document;
use crate::types::{NativeResult, Params, Row, SourceKind};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Connector for the `http-api` kind.
pub struct HttpApiConnector {
    settings: HttpBackend,
    client: reqwest::Client,
}

impl HttpApiConnector {
    /// Connector for the given backend settings.
    pub fn new(settings: HttpBackend) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| Error::internal(format!("failed to build http client: {e}")))?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl Connector for HttpApiConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::HttpApi
    }

    async fn connect(&self) -> Result<Box<dyn Handle>> {
        Ok(Box::new(HttpHandle {
            settings: self.settings.clone(),
            client: self.client.clone(),
        }))
    }
}

struct HttpHandle {
    settings: HttpBackend,
    client: reqwest::Client,
}

#[async_trait]
impl Handle for HttpHandle {
    async fn run(&mut self, query: &str, params: &Params) -> Result<NativeResult> {
        let (filled, used) = fill_template(query, params)?;
        let mut url = Url::parse(&filled)
            .map_err(|e| Error::validation(format!("invalid request url '{filled}': {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::validation(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        if !self.settings.allowed_hosts.is_empty() {
            let host = url.host_str().unwrap_or_default().to_string();
            if !self.settings.allowed_hosts.iter().any(|h| *h == host) {
                return Err(Error::permanent(format!(
                    "host '{host}' is not in the allowed list"
                )));
            }
        }

        // Params not consumed by the path become query-string pairs.
        for (name, value) in params.iter() {
            if !used.contains(name) {
                url.query_pairs_mut().append_pair(name, &value.as_text());
            }
        }

        let mut request = self.client.get(url);
        for (name, value) in &self.settings.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error("http request failed", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error("http request failed", status.as_u16()));
        }

        let payload: Json = response
            .json()
            .await
            .map_err(|e| Error::permanent_with("response body is not valid JSON", e))?;

        Ok(NativeResult::rows(payload_to_rows(payload)))
    }

    async fn is_valid(&mut self) -> bool {
        // The handle holds no socket of its own; the client pools those.
        true
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fill `{name}` template segments, returning the names consumed.
fn fill_template(template: &str, params: &Params) -> Result<(String, HashSet<String>)> {
    let mut out = String::with_capacity(template.len());
    let mut used = HashSet::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let close = tail.find('}').ok_or_else(|| {
            Error::validation("unterminated '{' in url template".to_string())
        })?;
        let name = &tail[..close];
        let value = params.get(name).ok_or_else(|| {
            Error::validation(format!("url template references unknown parameter '{name}'"))
        })?;
        out.push_str(&value.as_text());
        used.insert(name.to_string());
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok((out, used))
}

/// Map a response payload to rows: arrays element-wise, anything else as a
/// single row.
fn payload_to_rows(payload: Json) -> Vec<Row> {
    match payload {
        Json::Array(items) => items.iter().map(flatten_document).collect(),
        other => vec![flatten_document(&other)],
    }
}

/// Classify a non-2xx status. Throttling and server-side failures are
/// retry-safe; everything else is caller-fixable.
pub(crate) fn status_to_error(context: &str, status: u16) -> Error {
    if status == 408 || status == 429 || status >= 500 {
        Error::transient(format!("{context}: status {status}"))
    } else {
        Error::permanent_status(format!("{context}: status {status}"), status)
    }
}

/// Classify a request-level failure from the HTTP client.
pub(crate) fn map_send_error(context: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() || error.is_connect() {
        Error::transient_with(format!("{context}: {error}"), error)
    } else if error.is_decode() {
        Error::permanent_with(format!("{context}: {error}"), error)
    } else {
        Error::transient_with(format!("{context}: {error}"), error)
    }
}
