//! Document-store connector.
//!
//! The query text is a JSON selector document in Mango `_find` form;
//! params are merged into the selector as equality conditions. Returned
//! documents are flattened to single-level rows with dotted column names
//! so the tabular contract holds.

use crate::config::DocumentBackend;
use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::http::{map_send_error, status_to_error};
use crate::normalize::flatten_document;
use crate::types::{NativeResult, Params, QueryRequest, Row, SourceKind};
use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::time::Duration;

/// Connector for the `document-store` kind.
pub struct DocumentConnector {
    settings: DocumentBackend,
    client: reqwest::Client,
}

impl DocumentConnector {
    /// Connector for the given backend settings.
    pub fn new(settings: DocumentBackend) -> Result<Self> {
        url::Url::parse(&settings.base_url)
            .map_err(|e| Error::validation(format!("invalid document base url: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| Error::internal(format!("failed to build document client: {e}")))?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl Connector for DocumentConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::DocumentStore
    }

    fn check(&self, request: &QueryRequest) -> Result<()> {
        // Parse early so malformed selectors never reach the pool.
        build_find_body(&request.query, &request.params).map(|_| ())
    }

    async fn connect(&self) -> Result<Box<dyn Handle>> {
        Ok(Box::new(DocumentHandle {
            settings: self.settings.clone(),
            client: self.client.clone(),
        }))
    }
}

struct DocumentHandle {
    settings: DocumentBackend,
    client: reqwest::Client,
}

impl DocumentHandle {
    fn database_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.database,
            suffix
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.settings.username, &self.settings.password) {
            (Some(username), password) => request.basic_auth(username, password.as_deref()),
            _ => request,
        }
    }
}

#[async_trait]
impl Handle for DocumentHandle {
    async fn run(&mut self, query: &str, params: &Params) -> Result<NativeResult> {
        let body = build_find_body(query, params)?;
        let request = self
            .authorize(self.client.post(self.database_url("/_find")))
            .json(&body);

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error("document query failed", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error("document query failed", status.as_u16()));
        }

        let payload: Json = response
            .json()
            .await
            .map_err(|e| Error::permanent_with("document response is not valid JSON", e))?;
        let docs = payload
            .get("docs")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::permanent("document response has no 'docs' array"))?;

        let rows: Vec<Row> = docs.iter().map(flatten_document).collect();
        Ok(NativeResult::rows(rows))
    }

    async fn is_valid(&mut self) -> bool {
        let request = self.authorize(self.client.head(self.database_url("")));
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build the `_find` request body: the query text is either a full find
/// document (with a `selector` key) or a bare selector. Params are merged
/// into the selector as equality conditions, overriding same-named fields.
fn build_find_body(query: &str, params: &Params) -> Result<Map<String, Json>> {
    let parsed: Json = serde_json::from_str(query)
        .map_err(|e| Error::validation(format!("query is not a valid selector document: {e}")))?;
    let Json::Object(fields) = parsed else {
        return Err(Error::validation(
            "query must be a JSON object selector".to_string(),
        ));
    };

    let mut body = if fields.contains_key("selector") {
        fields
    } else {
        let mut wrapper = Map::new();
        wrapper.insert("selector".to_string(), Json::Object(fields));
        wrapper
    };

    match body.get_mut("selector") {
        Some(Json::Object(selector)) => {
            for (name, value) in params.iter() {
                selector.insert(name.to_string(), value.to_json());
            }
        }
        _ => {
            return Err(Error::validation(
                "'selector' must be a JSON object".to_string(),
            ))
        }
    }

    Ok(body)
}
