//! HTTP-API and document-store connector tests against a local mock server.

use querymux::prelude::*;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_config() -> EngineConfig {
    EngineConfig::default()
        .with_request_timeout(Duration::from_secs(2))
        .with_retry_backoff(Duration::from_millis(1))
        .with_idle_eviction_period(Duration::ZERO)
}

// ==================== HTTP-API Connector Tests ====================

#[tokio::test]
async fn test_array_response_maps_to_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/costs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"branch": "east", "avg_cost": 12.5},
            {"branch": "west", "avg_cost": 9.1},
        ])))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config()).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/costs", server.uri()),
        ))
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(
        result.columns,
        Some(vec!["branch".to_string(), "avg_cost".to_string()])
    );
    assert_eq!(result.row_count, Some(2));
}

#[tokio::test]
async fn test_params_become_query_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/costs"))
        .and(query_param("t", "acme"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"n": 1}])))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config()).expect("dispatcher");
    let result = dispatcher
        .execute(
            QueryRequest::new(SourceKind::HttpApi, format!("{}/costs", server.uri()))
                .with_param("t", "acme")
                .with_param("limit", 5i64),
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
}

#[tokio::test]
async fn test_path_template_substitution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenants/acme/costs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"n": 1}])))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config()).expect("dispatcher");
    let result = dispatcher
        .execute(
            QueryRequest::new(
                SourceKind::HttpApi,
                format!("{}/tenants/{{tenant}}/costs", server.uri()),
            )
            .with_param("tenant", "acme"),
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.row_count, Some(1));
}

#[tokio::test]
async fn test_object_response_is_single_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/summary"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"total": 9, "status": {"state": "ok"}})),
        )
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config()).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/summary", server.uri()),
        ))
        .await;

    assert_eq!(result.row_count, Some(1));
    let data = result.data.expect("data");
    assert_eq!(data[0]["total"], json!(9));
    // Nested objects flatten to dotted column names.
    assert_eq!(data[0]["status.state"], json!("ok"));
}

#[tokio::test]
async fn test_non_2xx_carries_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config().with_retry_count(0)).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/missing", server.uri()),
        ))
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or_default().contains("404"));
}

#[tokio::test]
async fn test_server_errors_retried_until_recovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"ok": true}])))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(quick_config().with_retry_count(2)).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/flaky", server.uri()),
        ))
        .await;

    assert!(result.success, "error: {:?}", result.error);
}

#[tokio::test]
async fn test_default_headers_attached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("x-api-key", "k-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let config = quick_config().with_backends(BackendSettings {
        http: HttpBackend::default().with_header("x-api-key", "k-123"),
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(config).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/secure", server.uri()),
        ))
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.row_count, Some(0));
}

#[tokio::test]
async fn test_host_allow_list_enforced() {
    let server = MockServer::start().await;
    let config = quick_config().with_backends(BackendSettings {
        http: HttpBackend::default()
            .with_allowed_hosts(vec!["api.permitted.example".to_string()]),
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(config).expect("dispatcher");

    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::HttpApi,
            format!("{}/costs", server.uri()),
        ))
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("not in the allowed list"));
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 0);
}

// ==================== Document-Store Connector Tests ====================

fn document_config(server: &MockServer) -> EngineConfig {
    quick_config().with_backends(BackendSettings {
        document: Some(DocumentBackend::new(server.uri(), "metrics")),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_document_find_merges_params_into_selector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/metrics/_find"))
        .and(body_partial_json(json!({
            "selector": {"status": "open", "tenant": "acme"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": [
                {"_id": "d1", "status": "open", "cost": {"total": 12}},
                {"_id": "d2", "status": "open"},
            ]
        })))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(document_config(&server)).expect("dispatcher");
    let result = dispatcher
        .execute(
            QueryRequest::new(SourceKind::DocumentStore, r#"{"status": "open"}"#)
                .with_param("tenant", "acme"),
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.row_count, Some(2));

    // Nested document fields flatten to dotted columns, missing fields
    // null-fill.
    let columns = result.columns.expect("columns");
    assert!(columns.contains(&"cost.total".to_string()));
    let data = result.data.expect("data");
    assert_eq!(data[0]["cost.total"], json!(12));
    assert_eq!(data[1]["cost.total"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_document_invalid_selector_rejected_before_backend() {
    let server = MockServer::start().await;
    let dispatcher = Dispatcher::new(document_config(&server)).expect("dispatcher");

    let result = dispatcher
        .execute(QueryRequest::new(SourceKind::DocumentStore, "SELECT 1"))
        .await;

    assert!(!result.success);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 0);
}

#[tokio::test]
async fn test_document_backend_rejection_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/metrics/_find"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "bad_request", "reason": "invalid operator"
        })))
        .mount(&server)
        .await;

    let dispatcher =
        Dispatcher::new(document_config(&server).with_retry_count(3)).expect("dispatcher");
    let result = dispatcher
        .execute(QueryRequest::new(
            SourceKind::DocumentStore,
            r#"{"selector": {"a": {"$bogus": 1}}}"#,
        ))
        .await;

    assert!(!result.success);
    // A 400 is caller-fixable; only the single attempt reaches the server.
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
}
