//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use inspector_proxy::{ProxyConfig, SessionManager};
use inspector_server::{Server, ServerConfig};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// An inspector server running in the background.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub manager: SessionManager,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with default limits.
    pub async fn start() -> Result<Self> {
        Self::start_with(ProxyConfig::default().with_connect_timeout(Duration::from_secs(5))).await
    }

    /// Start a server with a specific proxy configuration.
    pub async fn start_with(proxy: ProxyConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let manager = SessionManager::new(proxy);
        let config = ServerConfig::new()
            .with_bind_address(addr)
            .with_request_logging(false);
        let server = Server::new(manager.clone(), config);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .run_with_shutdown(listener, async {
                    let _ = rx.await;
                })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            manager,
            shutdown: Some(tx),
            handle,
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base_url(), path))
    }

    pub fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(format!("{}{}", self.base_url(), path))
    }

    /// Trigger graceful shutdown and wait for the server task.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(Duration::from_secs(5), &mut self.handle).await??;
        Ok(())
    }
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock streamable HTTP backend
// ─────────────────────────────────────────────────────────────────────────────

/// A minimal MCP server speaking streamable HTTP.
///
/// Requests are answered with `{"method": <method>}` as the result;
/// notifications get 202. There is no standalone stream.
pub struct MockBackend {
    pub url: String,
    _handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Result<Self> {
        let app = Router::new().route(
            "/mcp",
            post(backend_post)
                .get(|| async { StatusCode::METHOD_NOT_ALLOWED })
                .delete(|| async { StatusCode::OK }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            url: format!("http://{addr}/mcp"),
            _handle: handle,
        })
    }
}

async fn backend_post(headers: HeaderMap, body: Bytes) -> Response {
    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let (Some(id), Some(method)) = (message.get("id"), message.get("method")) else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut result = json!({ "method": method });
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        result["authorization"] = json!(auth);
    }

    let mut response =
        Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response();
    response
        .headers_mut()
        .insert("mcp-session-id", "backend-session".parse().unwrap());
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE reading
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Event reader over a streaming reqwest response.
pub struct SseReader {
    stream: futures::stream::BoxStream<
        'static,
        Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>,
    >,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            stream: response.bytes_stream().eventsource().boxed(),
        }
    }

    /// Next event carrying data.
    pub async fn next_frame(&mut self) -> Result<SseFrame> {
        timeout(Duration::from_secs(5), self.read_frame()).await?
    }

    async fn read_frame(&mut self) -> Result<SseFrame> {
        loop {
            let event = match self.stream.next().await {
                Some(event) => event?,
                None => anyhow::bail!("event stream ended"),
            };
            if event.data.is_empty() {
                continue;
            }
            let name = if event.event.is_empty() {
                "message".to_string()
            } else {
                event.event
            };
            return Ok(SseFrame {
                event: name,
                data: event.data,
            });
        }
    }
}
