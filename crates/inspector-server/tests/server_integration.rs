//! End-to-end tests against a running server.
//!
//! Backends are in-process streamable HTTP servers, so these run on every
//! platform without spawning processes.

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{MockBackend, SseReader, TestServer, eventually};
use inspector_proxy::ProxyConfig;
use reqwest::StatusCode;
use serde_json::{Value, json};

fn streamable_descriptor(url: &str) -> Value {
    json!({ "id": "mock", "name": "Mock", "kind": "streamable-http", "url": url })
}

// ─────────────────────────────────────────────────────────────────────────────
// REST session management
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_list_get_delete_connection() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;

    let resp = server
        .post("/api/v1/connections")
        .json(&streamable_descriptor(&backend.url))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await?;
    let id = created["session_id"].as_str().unwrap().to_string();
    assert_eq!(created["status"]["state"], "connected");
    assert_eq!(created["status"]["kind"], "streamable-http");

    let list: Value = server.get("/api/v1/connections").send().await?.json().await?;
    assert_eq!(list["total"], 1);

    let status: Value = server
        .get(&format!("/api/v1/connections/{id}"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["session_id"], id.as_str());
    assert_eq!(status["paired"], false);

    let health: Value = server.get("/health").send().await?.json().await?;
    assert_eq!(health["active_sessions"], 1);

    let resp = server
        .delete(&format!("/api/v1/connections/{id}"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let closed: Value = resp.json().await?;
    assert_eq!(closed["closed"], true);

    let resp = server
        .delete(&format!("/api/v1/connections/{id}"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let list: Value = server.get("/api/v1/connections").send().await?.json().await?;
    assert_eq!(list["total"], 0);

    server.stop().await
}

#[tokio::test]
async fn test_refused_backend_is_bad_gateway() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .post("/api/v1/connections")
        .json(&streamable_descriptor("http://127.0.0.1:1/mcp"))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "transport_creation_error");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Connection refused")
    );
    assert!(body["detail"].is_string());
    assert_eq!(server.manager.session_count(), 0);

    server.stop().await
}

#[tokio::test]
async fn test_foreign_field_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .post("/api/v1/connections")
        .json(&json!({
            "id": "a", "name": "A", "kind": "sse",
            "url": "http://localhost/sse", "command": "node"
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "config_error");

    server.stop().await
}

#[tokio::test]
async fn test_admission_limit_returns_429() -> Result<()> {
    let server = TestServer::start_with(ProxyConfig::default().with_max_connections(1)).await?;
    let backend = MockBackend::start().await?;
    let descriptor = streamable_descriptor(&backend.url);

    let first = server
        .post("/api/v1/connections")
        .json(&descriptor)
        .send()
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = server
        .post("/api/v1/connections")
        .json(&descriptor)
        .send()
        .await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = second.json().await?;
    assert_eq!(body["code"], "admission_error");

    let resp = server.delete("/api/v1/connections").send().await?;
    let body: Value = resp.json().await?;
    assert_eq!(body["closed"], 1);

    let third = server
        .post("/api/v1/connections")
        .json(&descriptor)
        .send()
        .await?;
    assert_eq!(third.status(), StatusCode::CREATED);

    server.stop().await
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamable HTTP clients
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mcp_endpoint_round_trip() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;
    let query = format!("/mcp?transportType=streamable-http&url={}", backend.url);

    // First POST creates the session.
    let resp = server
        .post(&query)
        .header("authorization", "Bearer secret")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let session_id = resp
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()?
        .to_string();
    let reply: Value = resp.json().await?;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["method"], "initialize");
    assert_eq!(reply["result"]["authorization"], "Bearer secret");

    // Notifications are accepted without a body.
    let resp = server
        .post("/mcp")
        .header("mcp-session-id", &session_id)
        .json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    // Batches come back as arrays.
    let resp = server
        .post("/mcp")
        .header("mcp-session-id", &session_id)
        .json(&json!([
            { "jsonrpc": "2.0", "id": "a", "method": "tools/list" },
            { "jsonrpc": "2.0", "id": "b", "method": "prompts/list" }
        ]))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let replies: Value = resp.json().await?;
    assert_eq!(replies[0]["id"], "a");
    assert_eq!(replies[1]["result"]["method"], "prompts/list");

    let status: Value = server
        .get(&format!("/api/v1/connections/{session_id}"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["paired"], true);

    let resp = server
        .delete("/mcp")
        .header("mcp-session-id", &session_id)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .post("/mcp")
        .header("mcp-session-id", &session_id)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.stop().await
}

#[tokio::test]
async fn test_mcp_second_standalone_stream_conflicts() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;
    let query = format!("/mcp?transportType=streamable-http&url={}", backend.url);

    let resp = server
        .post(&query)
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
        .send()
        .await?;
    let session_id = resp
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()?
        .to_string();

    let first = server
        .get("/mcp")
        .header("mcp-session-id", &session_id)
        .send()
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(
        first.headers()["content-type"]
            .to_str()?
            .starts_with("text/event-stream")
    );

    let second = server
        .get("/mcp")
        .header("mcp-session-id", &session_id)
        .send()
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    drop(first);
    server.stop().await
}

#[tokio::test]
async fn test_mcp_bad_query_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .post("/mcp?transportType=carrier-pigeon")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .post("/mcp")
        .body("42")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    server.stop().await
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy SSE clients
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sse_client_round_trip_and_disconnect() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;

    let resp = server
        .get(&format!(
            "/sse?transportType=streamable-http&url={}",
            backend.url
        ))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let mut events = SseReader::new(resp);

    let endpoint = events.next_frame().await?;
    assert_eq!(endpoint.event, "endpoint");
    assert!(endpoint.data.starts_with("/message?sessionId="));

    let resp = server
        .post(&endpoint.data)
        .json(&json!({ "jsonrpc": "2.0", "id": 9, "method": "tools/list" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let frame = events.next_frame().await?;
    assert_eq!(frame.event, "message");
    let reply: Value = serde_json::from_str(&frame.data)?;
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["result"]["method"], "tools/list");

    let resp = server.post(&endpoint.data).body("not json").send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Dropping the event stream tears the session down.
    drop(events);
    let manager = server.manager.clone();
    assert!(eventually(|| {
        let manager = manager.clone();
        async move { manager.session_count() == 0 }
    })
    .await);

    let resp = server
        .post(&endpoint.data)
        .json(&json!({ "jsonrpc": "2.0", "id": 10, "method": "ping" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.stop().await
}

#[tokio::test]
async fn test_closing_session_ends_sse_stream() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;

    let resp = server
        .get(&format!(
            "/sse?transportType=streamable-http&url={}",
            backend.url
        ))
        .send()
        .await?;
    let mut events = SseReader::new(resp);
    let endpoint = events.next_frame().await?;
    let session_id = endpoint
        .data
        .trim_start_matches("/message?sessionId=")
        .to_string();

    server
        .delete(&format!("/api/v1/connections/{session_id}"))
        .send()
        .await?;

    let err = events.next_frame().await.unwrap_err();
    assert!(err.to_string().contains("ended"), "got {err}");

    server.stop().await
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() -> Result<()> {
    let server = TestServer::start().await?;
    let backend = MockBackend::start().await?;

    let resp = server
        .get(&format!(
            "/sse?transportType=streamable-http&url={}",
            backend.url
        ))
        .send()
        .await?;
    let mut events = SseReader::new(resp);
    events.next_frame().await?;
    let manager = server.manager.clone();

    tokio::time::timeout(Duration::from_secs(10), server.stop()).await??;
    assert_eq!(manager.session_count(), 0);
    Ok(())
}
