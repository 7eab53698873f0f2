//! Bidirectional forwarding between a client-facing and a backend channel.
//!
//! ```text
//!   client ──(message)──▶ relay ──▶ server
//!     ▲                     │
//!     └──(error -32001)─────┘   when forwarding a request fails
//!   client ◀──(message, stderr)── relay ◀── server
//! ```
//!
//! Closing either side closes the other exactly once. Errors are reported to
//! an [`ErrorSink`] and never trigger a close on their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{JsonRpcError, JsonRpcMessage, STDERR_NOTIFICATION};
use crate::transport::{SharedTransport, TransportEvent};

/// Which side of a relay something happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The client-facing channel.
    Client,
    /// The backend channel.
    Server,
}

impl Side {
    /// Lowercase label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Receives relay errors.
pub trait ErrorSink: Send + Sync + 'static {
    /// A channel reported an error or a forward failed.
    fn report(&self, side: Side, error: &str);
}

/// [`ErrorSink`] that writes to `tracing`, tagged with the session id.
#[derive(Debug, Clone)]
pub struct TracingErrorSink {
    session_id: String,
}

impl TracingErrorSink {
    /// Sink for the given session.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

impl ErrorSink for TracingErrorSink {
    fn report(&self, side: Side, error: &str) {
        warn!(session_id = %self.session_id, side = side.as_str(), error = %error, "relay error");
    }
}

/// Handles to the two forwarding tasks.
#[derive(Debug)]
pub struct RelayHandle {
    client_to_server: JoinHandle<()>,
    server_to_client: JoinHandle<()>,
}

impl RelayHandle {
    /// Wait until both directions have finished.
    pub async fn join(self) {
        let _ = self.client_to_server.await;
        let _ = self.server_to_client.await;
    }
}

struct CloseState {
    client_closed: AtomicBool,
    server_closed: AtomicBool,
}

impl CloseState {
    fn flag(&self, side: Side) -> &AtomicBool {
        match side {
            Side::Client => &self.client_closed,
            Side::Server => &self.server_closed,
        }
    }
}

/// Wire `client` and `server` together.
///
/// Subscriptions are taken before this returns, so no event emitted after the
/// call is missed.
pub fn wire(
    client: SharedTransport,
    server: SharedTransport,
    sink: Arc<dyn ErrorSink>,
) -> RelayHandle {
    let state = Arc::new(CloseState {
        client_closed: AtomicBool::new(false),
        server_closed: AtomicBool::new(false),
    });

    let client_events = client.subscribe();
    let server_events = server.subscribe();

    let client_to_server = tokio::spawn(forward(
        Side::Client,
        client_events,
        client.clone(),
        server.clone(),
        state.clone(),
        sink.clone(),
    ));
    let server_to_client = tokio::spawn(forward(
        Side::Server,
        server_events,
        server,
        client,
        state,
        sink,
    ));

    RelayHandle {
        client_to_server,
        server_to_client,
    }
}

async fn forward(
    side: Side,
    mut events: crate::transport::EventStream,
    source: SharedTransport,
    target: SharedTransport,
    state: Arc<CloseState>,
    sink: Arc<dyn ErrorSink>,
) {
    let other = match side {
        Side::Client => Side::Server,
        Side::Server => Side::Client,
    };

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(message) => match side {
                Side::Client => forward_request(message, &source, &target, &state, &*sink).await,
                Side::Server => {
                    if let Err(e) = target.send(message).await {
                        sink.report(Side::Client, &format!("failed to forward to client: {e}"));
                    }
                }
            },
            TransportEvent::Stderr(line) => {
                if side == Side::Server {
                    let note =
                        JsonRpcMessage::notification(STDERR_NOTIFICATION, Some(json!({ "content": line })));
                    if let Err(e) = target.send(note).await {
                        debug!(error = %e, "failed to forward stderr");
                    }
                }
            }
            TransportEvent::Error(e) => sink.report(side, &e),
            TransportEvent::Closed => {
                state.flag(side).store(true, Ordering::SeqCst);
                if !state.flag(other).swap(true, Ordering::SeqCst) && !target.is_closed() {
                    debug!(
                        closed = side.as_str(),
                        closing = other.as_str(),
                        "propagating close"
                    );
                    if let Err(e) = target.close().await {
                        sink.report(other, &format!("close failed: {e}"));
                    }
                }
                break;
            }
        }
    }
}

async fn forward_request(
    message: JsonRpcMessage,
    client: &SharedTransport,
    server: &SharedTransport,
    state: &CloseState,
    sink: &dyn ErrorSink,
) {
    let id = if message.is_request() { message.id() } else { None };
    let Err(e) = server.send(message).await else {
        return;
    };

    sink.report(Side::Server, &format!("failed to forward to server: {e}"));
    let Some(id) = id else {
        return;
    };
    if state.client_closed.load(Ordering::SeqCst) || client.is_closed() {
        debug!(id = %id, "client gone, dropping forward failure");
        return;
    }

    let reply = JsonRpcMessage::error_response(
        &id,
        JsonRpcError::new(
            JsonRpcError::PROXY_FORWARD_FAILED,
            format!("Failed to forward request to server: {e}"),
        ),
    );
    if let Err(e) = client.send(reply).await {
        sink.report(Side::Client, &format!("failed to deliver error response: {e}"));
    }
}
