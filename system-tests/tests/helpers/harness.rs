// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Stub SUT Harness
// Description: In-process HTTP services for end-to-end suites.
// Purpose: Provide deterministic SUT behavior with startup and teardown.
// Dependencies: axum, tokio
// ============================================================================

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Shared state of one stub SUT.
#[derive(Default)]
pub struct StubState {
    /// Calls observed by the `/pending` endpoint.
    pending_calls: AtomicU32,
}

/// Handle for a spawned stub SUT.
pub struct StubSut {
    base_url: String,
    join: JoinHandle<()>,
}

impl StubSut {
    /// Returns the stub's base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shuts down the server task.
    pub async fn shutdown(self) {
        self.join.abort();
        let _ = self.join.await;
    }
}

/// Spawns the stub SUT on a free loopback port.
pub async fn spawn_stub_sut() -> StubSut {
    let state = Arc::new(StubState::default());
    let router = Router::new()
        .route("/a", get(handle_a))
        .route("/b", get(handle_b))
        .route("/pending", get(handle_pending))
        .route("/fail", get(handle_fail))
        .route("/payment", get(handle_payment))
        .route("/refund", get(handle_ok))
        .route("/capture", get(handle_ok))
        .route("/slow", get(handle_slow))
        .route("/echo", post(handle_echo))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr: SocketAddr = listener.local_addr().expect("listener address");
    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    StubSut {
        base_url: format!("http://{addr}"),
        join,
    }
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

async fn handle_a() -> Json<Value> {
    Json(json!({"id": 42}))
}

async fn handle_b(Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    if params.get("id").map(String::as_str) == Some("42") {
        (StatusCode::OK, Json(json!({"ok": true})))
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"ok": false})))
    }
}

async fn handle_pending(State(state): State<Arc<StubState>>) -> Json<Value> {
    let calls = state.pending_calls.fetch_add(1, Ordering::SeqCst);
    if calls < 2 {
        Json(json!({"status": "pending"}))
    } else {
        Json(json!({"status": "done"}))
    }
}

async fn handle_fail() -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})))
}

async fn handle_payment(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let status = params.get("state").cloned().unwrap_or_else(|| "captured".to_string());
    Json(json!({"payment_status": status}))
}

async fn handle_ok() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn handle_slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    Json(json!({"ok": true}))
}

async fn handle_echo(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"echo": body}))
}
