//! Legacy SSE client transport.
//!
//! The backend is reached by a long-lived `GET` returning `text/event-stream`.
//! Its first `endpoint` event names the URL that accepts client messages via
//! `POST`. Every subsequent `message` event carries one JSON-RPC payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::http::{
    build_client, content_type, is_event_stream, is_message_event, sse_events, status_error,
};
use super::{CloseFlag, EventHub, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

/// Client channel to an SSE backend.
pub struct SseTransport {
    url: Url,
    client: reqwest::Client,
    request_timeout: Option<Duration>,
    endpoint: parking_lot::Mutex<Option<Url>>,
    events: Arc<EventHub>,
    cancel: CancellationToken,
    started: CloseFlag,
    closing: CloseFlag,
}

impl SseTransport {
    /// Create an unstarted transport. `headers` are sent on every request.
    pub fn new(
        url: Url,
        headers: HeaderMap,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            url,
            client: build_client(headers)?,
            request_timeout,
            endpoint: parking_lot::Mutex::new(None),
            events: Arc::new(EventHub::new()),
            cancel: CancellationToken::new(),
            started: CloseFlag::default(),
            closing: CloseFlag::default(),
        })
    }

    /// The resolved message endpoint, once the backend announced it.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.lock().clone()
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if !self.started.begin() {
            return Err(TransportError::AlreadyStarted);
        }

        let resp = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        let ct = content_type(&resp);
        if !is_event_stream(&ct) {
            return Err(TransportError::protocol(format!(
                "expected content-type text/event-stream, got '{ct}'"
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Result<Url, TransportError>>();
        let base = self.url.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let mut stream = sse_events(resp);

        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                let event = match next {
                    Some(Ok(event)) => event,
                    None => {
                        debug!(url = %base, "sse stream ended");
                        break;
                    }
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Error(format!("sse stream failed: {e}")));
                        break;
                    }
                };

                if event.event == "endpoint" {
                    let resolved = base.join(event.data.trim()).map_err(|e| {
                        TransportError::protocol(format!("invalid endpoint '{}': {e}", event.data))
                    });
                    match endpoint_tx.take() {
                        Some(tx) => {
                            let _ = tx.send(resolved);
                        }
                        None => warn!(url = %base, "ignoring repeated endpoint event"),
                    }
                } else if is_message_event(&event) {
                    trace!(data = %event.data, "received sse message");
                    match JsonRpcMessage::parse_str(&event.data) {
                        Ok(message) => events.emit(TransportEvent::Message(message)),
                        Err(e) => events.emit(TransportEvent::Error(format!(
                            "invalid message on sse stream: {e}"
                        ))),
                    }
                } else {
                    trace!(event = %event.event, "ignoring sse event");
                }
            }
            events.emit_closed();
        });

        let endpoint = match endpoint_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::protocol(
                    "sse stream ended before the endpoint event",
                ));
            }
        };
        debug!(url = %self.url, endpoint = %endpoint, "sse endpoint announced");
        *self.endpoint.lock() = Some(endpoint);
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.closing.is_set() || self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        let endpoint = self.endpoint().ok_or(TransportError::NotStarted)?;

        let mut req = self.client.post(endpoint).json(message.as_value());
        if let Some(timeout) = self.request_timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(|e| TransportError::from_reqwest(&e))?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closing.begin() {
            return Ok(());
        }
        self.cancel.cancel();
        self.events.emit_closed();
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
