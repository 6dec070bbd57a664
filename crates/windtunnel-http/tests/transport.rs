// windtunnel-http/tests/transport.rs
// ============================================================================
// Module: Transport Tests
// Description: Request execution and failure classification.
// ============================================================================
//! ## Overview
//! Exercises the reqwest transport against a local axum server: captured
//! status/headers/body, query handling, per-request deadlines classified as
//! timeouts, and refused connections classified as connect failures.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use windtunnel_core::interfaces::HttpTransport;
use windtunnel_core::interfaces::TransportErrorKind;
use windtunnel_core::interfaces::TransportRequest;
use windtunnel_http::ReqwestTransport;

// ============================================================================
// SECTION: Harness
// ============================================================================

async fn spawn_server() -> SocketAddr {
    let router = Router::new()
        .route("/ok", get(|| async { Json(json!({"ok": true})) }))
        .route(
            "/echo-query",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!({"q": params}))
            }),
        )
        .route(
            "/echo-body",
            post(|Json(body): Json<Value>| async move { Json(json!({"body": body})) }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"ok": true}))
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

fn request(url: String) -> TransportRequest {
    TransportRequest {
        method: "GET".to_string(),
        url,
        headers: BTreeMap::new(),
        query: BTreeMap::new(),
        json_body: None,
        form_body: None,
        deadline: Duration::from_secs(2),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn captures_status_headers_and_body() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::with_defaults().unwrap();

    let response = transport.send(&request(format!("http://{addr}/ok"))).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response
        .headers
        .get("content-type")
        .is_some_and(|value| value.contains("json")));
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn query_parameters_are_encoded() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::with_defaults().unwrap();

    let mut req = request(format!("http://{addr}/echo-query"));
    req.query.insert("id".to_string(), "42".to_string());
    req.query.insert("name".to_string(), "a b".to_string());
    let response = transport.send(&req).await.unwrap();
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({"q": {"id": "42", "name": "a b"}}));
}

#[tokio::test]
async fn json_bodies_round_trip() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::with_defaults().unwrap();

    let mut req = request(format!("http://{addr}/echo-body"));
    req.method = "POST".to_string();
    req.json_body = Some(json!({"sku": "abc", "qty": 2}));
    let response = transport.send(&req).await.unwrap();
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({"body": {"sku": "abc", "qty": 2}}));
}

#[tokio::test]
async fn expired_deadlines_classify_as_timeout() {
    let addr = spawn_server().await;
    let transport = ReqwestTransport::with_defaults().unwrap();

    let mut req = request(format!("http://{addr}/slow"));
    req.deadline = Duration::from_millis(50);
    let err = transport.send(&req).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Timeout);
}

#[tokio::test]
async fn refused_connections_classify_as_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = ReqwestTransport::with_defaults().unwrap();
    let err = transport.send(&request(format!("http://{addr}/ok"))).await.unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Connect);
}
