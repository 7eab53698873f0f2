//! Channel for the `/mcp` streamable HTTP endpoint.
//!
//! Each POSTed request registers a waiter keyed by its id; the backend's reply
//! completes the waiter and becomes the POST's response body. Everything else
//! the backend sends goes to the standalone GET stream when one is open.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use futures::Stream;
use inspector_proxy::{
    EventHub, JsonRpcMessage, RequestId, Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::message_event;

/// Server half of a streamable HTTP client connection.
pub struct StreamableServerTransport {
    session_id: String,
    events: EventHub,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcMessage>>>,
    stream: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl StreamableServerTransport {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            events: EventHub::new(),
            pending: Mutex::new(HashMap::new()),
            stream: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Publish a message the browser POSTed.
    ///
    /// Requests return a receiver that resolves with the backend's reply.
    pub fn deliver(
        &self,
        message: JsonRpcMessage,
    ) -> Result<Option<oneshot::Receiver<JsonRpcMessage>>, TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        let waiter = match message.id() {
            Some(id) if message.is_request() => {
                let (tx, rx) = oneshot::channel();
                self.pending.lock().insert(id, tx);
                Some(rx)
            }
            _ => None,
        };
        self.events.emit(TransportEvent::Message(message));
        Ok(waiter)
    }

    /// Open the standalone stream. `None` when one is already open.
    pub fn open_stream(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        let mut stream = self.stream.lock();
        if stream.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *stream = Some(tx);
        Some(rx)
    }

    /// Whether a standalone stream is currently open.
    pub fn has_stream(&self) -> bool {
        self.stream.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// SSE body for the standalone stream.
    pub fn standalone_stream(
        mut rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        async_stream::stream! {
            while let Some(message) = rx.recv().await {
                if let Some(event) = message_event(&message) {
                    yield event;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableServerTransport {
    fn kind(&self) -> &'static str {
        "streamable-http-client"
    }

    async fn start(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Closed);
        }

        let waiter = match message.id() {
            Some(id) if message.is_response() => self.pending.lock().remove(&id),
            _ => None,
        };
        let message = match waiter {
            Some(tx) => match tx.send(message) {
                Ok(()) => return Ok(()),
                // The POST went away; fall back to the stream.
                Err(message) => message,
            },
            None => message,
        };

        let delivered = match self.stream.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };
        if !delivered {
            debug!(
                session_id = %self.session_id,
                "no open stream for server message, dropped"
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pending.lock().clear();
        self.stream.lock().take();
        self.events.emit_closed();
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reply_completes_waiter() {
        let channel = StreamableServerTransport::new("s1");
        let mut events = channel.subscribe();

        let request = JsonRpcMessage::request(RequestId::Number(3), "tools/list", None);
        let waiter = channel.deliver(request.clone()).unwrap().unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Message(request)));
        assert_eq!(channel.pending_count(), 1);

        let reply = JsonRpcMessage::from_value(
            json!({ "jsonrpc": "2.0", "id": 3, "result": { "tools": [] } }),
        )
        .unwrap();
        channel.send(reply.clone()).await.unwrap();
        assert_eq!(waiter.await.unwrap(), reply);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notification_has_no_waiter() {
        let channel = StreamableServerTransport::new("s1");
        let waiter = channel
            .deliver(JsonRpcMessage::notification("notifications/initialized", None))
            .unwrap();
        assert!(waiter.is_none());
    }

    #[tokio::test]
    async fn test_unsolicited_messages_go_to_stream() {
        let channel = StreamableServerTransport::new("s1");
        let mut rx = channel.open_stream().unwrap();
        assert!(channel.has_stream());

        let note = JsonRpcMessage::notification("notifications/tools/list_changed", None);
        channel.send(note.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(note));
    }

    #[tokio::test]
    async fn test_second_stream_refused_until_first_dropped() {
        let channel = StreamableServerTransport::new("s1");
        let first = channel.open_stream().unwrap();
        assert!(channel.open_stream().is_none());

        drop(first);
        assert!(!channel.has_stream());
        assert!(channel.open_stream().is_some());
    }

    #[tokio::test]
    async fn test_message_without_stream_is_dropped() {
        let channel = StreamableServerTransport::new("s1");
        channel
            .send(JsonRpcMessage::notification("notifications/message", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_waiters() {
        let channel = StreamableServerTransport::new("s1");
        let waiter = channel
            .deliver(JsonRpcMessage::request(RequestId::Number(1), "ping", None))
            .unwrap()
            .unwrap();

        channel.close().await.unwrap();
        assert!(waiter.await.is_err());
        assert!(channel.is_closed());
        assert!(
            channel
                .deliver(JsonRpcMessage::notification("x", None))
                .is_err()
        );
    }
}
