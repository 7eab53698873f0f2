//! Channel for the `/stdio` and `/sse` endpoints.
//!
//! The browser holds a GET stream open and POSTs each message to
//! `/message?sessionId=...`. The first event on the stream names that
//! endpoint.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use futures::Stream;
use inspector_proxy::{EventHub, JsonRpcMessage, Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::message_event;

/// Server half of an SSE client connection.
pub struct SseServerTransport {
    session_id: String,
    events: EventHub,
    outbound: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl SseServerTransport {
    /// Create a channel and the receiver that feeds its SSE stream.
    pub fn new(
        session_id: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            session_id: session_id.into(),
            events: EventHub::new(),
            outbound: Mutex::new(Some(tx)),
        });
        (channel, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Path the browser POSTs messages to.
    pub fn endpoint(&self) -> String {
        format!("/message?sessionId={}", self.session_id)
    }

    /// Publish a message the browser POSTed.
    pub fn deliver(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        self.events.emit(TransportEvent::Message(message));
        Ok(())
    }

    /// Drop the outbound sender and publish `Closed`.
    fn shutdown(&self) -> bool {
        self.outbound.lock().take();
        self.events.emit_closed()
    }

    /// Build the response stream: the `endpoint` event, then every message
    /// the relay sends. Dropping the stream closes the channel.
    pub fn into_stream(
        self: Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        let endpoint = self.endpoint();
        let guard = CloseOnDrop(self);
        async_stream::stream! {
            let _guard = guard;
            yield Ok(Event::default().event("endpoint").data(endpoint));
            while let Some(message) = outbound.recv().await {
                if let Some(event) = message_event(&message) {
                    yield event;
                }
            }
        }
    }
}

struct CloseOnDrop(Arc<SseServerTransport>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.0.shutdown() {
            debug!(session_id = %self.0.session_id, "sse client stream ended");
        }
    }
}

#[async_trait]
impl Transport for SseServerTransport {
    fn kind(&self) -> &'static str {
        "sse-client"
    }

    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().clone();
        match outbound {
            Some(tx) => tx.send(message).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown();
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}
