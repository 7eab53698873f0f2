//! Streamable HTTP client transport.
//!
//! Each outgoing message is a `POST`; the backend answers with `202`, a JSON
//! body, or an event stream carrying one or more messages. Server-initiated
//! traffic arrives on an optional standalone `GET` stream. The backend may
//! assign a session id through the `mcp-session-id` header, which is replayed
//! on every later request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::http::{
    SseEvents, build_client, content_type, is_event_stream, is_json, is_message_event,
    sse_events, status_error,
};
use super::{CloseFlag, EventHub, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

/// Header carrying the backend-assigned session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const POST_ACCEPT: &str = "application/json, text/event-stream";
const DELETE_TIMEOUT: Duration = Duration::from_secs(2);

struct Shared {
    url: Url,
    client: reqwest::Client,
    session_id: parking_lot::Mutex<Option<String>>,
    events: EventHub,
    cancel: CancellationToken,
    stream_open: AtomicBool,
}

impl Shared {
    fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Record the session id from a response. Returns `true` if it was newly assigned.
    fn capture_session_id(&self, resp: &reqwest::Response) -> bool {
        let Some(value) = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let mut guard = self.session_id.lock();
        let fresh = guard.is_none();
        if guard.as_deref() != Some(value) {
            debug!(url = %self.url, session = value, "backend assigned session id");
            *guard = Some(value.to_string());
        }
        fresh
    }

    fn with_session(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session_id() {
            Some(id) => req.header(SESSION_ID_HEADER, id),
            None => req,
        }
    }
}

/// Client channel to a streamable HTTP backend.
pub struct StreamableHttpTransport {
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
    started: CloseFlag,
    closing: CloseFlag,
}

impl StreamableHttpTransport {
    /// Create an unstarted transport.
    ///
    /// An `mcp-session-id` entry in `headers` seeds the session id instead of
    /// being sent as a static header.
    pub fn new(
        url: Url,
        mut headers: HeaderMap,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let seeded = headers
            .remove(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok().map(str::to_string));
        Ok(Self {
            shared: Arc::new(Shared {
                url,
                client: build_client(headers)?,
                session_id: parking_lot::Mutex::new(seeded),
                events: EventHub::new(),
                cancel: CancellationToken::new(),
                stream_open: AtomicBool::new(false),
            }),
            request_timeout,
            started: CloseFlag::default(),
            closing: CloseFlag::default(),
        })
    }

    /// Session id assigned by the backend, if any.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    /// Whether the standalone server-to-client stream is open.
    pub fn has_standalone_stream(&self) -> bool {
        self.shared.stream_open.load(Ordering::SeqCst)
    }
}

/// Open the standalone GET stream. `Ok(false)` means the backend offers none.
async fn open_standalone_stream(shared: Arc<Shared>) -> Result<bool, TransportError> {
    if shared.stream_open.swap(true, Ordering::SeqCst) {
        return Ok(true);
    }

    let req = shared.with_session(
        shared
            .client
            .get(shared.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream")),
    );
    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            shared.stream_open.store(false, Ordering::SeqCst);
            return Err(TransportError::from_reqwest(&e));
        }
    };

    if !resp.status().is_success() || !is_event_stream(&content_type(&resp)) {
        trace!(url = %shared.url, status = %resp.status(), "no standalone stream");
        shared.stream_open.store(false, Ordering::SeqCst);
        return Ok(false);
    }
    shared.capture_session_id(&resp);

    let stream = sse_events(resp);
    tokio::spawn(async move {
        pump(&shared, stream).await;
        shared.stream_open.store(false, Ordering::SeqCst);
        debug!(url = %shared.url, "standalone stream ended");
    });
    Ok(true)
}

/// Forward every `message` event of an event stream to the hub.
async fn pump(shared: &Shared, mut stream: SseEvents) {
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) if is_message_event(&event) => {
                if event.data.trim().is_empty() {
                    continue;
                }
                match JsonRpcMessage::parse_str(&event.data) {
                    Ok(message) => shared.events.emit(TransportEvent::Message(message)),
                    Err(e) => shared.events.emit(TransportEvent::Error(format!(
                        "invalid message on event stream: {e}"
                    ))),
                }
            }
            Some(Ok(_)) => {}
            None => return,
            Some(Err(e)) => {
                shared
                    .events
                    .emit(TransportEvent::Error(format!("event stream failed: {e}")));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> &'static str {
        "streamable-http"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if !self.started.begin() {
            return Err(TransportError::AlreadyStarted);
        }
        let has_stream = open_standalone_stream(self.shared.clone()).await?;
        debug!(url = %self.shared.url, has_stream, "streamable http backend reachable");
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.closing.is_set() || self.shared.events.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.started.is_set() {
            return Err(TransportError::NotStarted);
        }

        let shared = &self.shared;
        let mut req = shared.with_session(
            shared
                .client
                .post(shared.url.clone())
                .header(ACCEPT, HeaderValue::from_static(POST_ACCEPT))
                .json(message.as_value()),
        );
        if let Some(timeout) = self.request_timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(|e| TransportError::from_reqwest(&e))?;

        if shared.capture_session_id(&resp) && !shared.stream_open.load(Ordering::SeqCst) {
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = open_standalone_stream(shared).await {
                    warn!(error = %e, "failed to open standalone stream");
                }
            });
        }

        let status = resp.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            return Err(status_error(resp).await);
        }

        let ct = content_type(&resp);
        if is_event_stream(&ct) {
            let stream = sse_events(resp);
            let shared = shared.clone();
            tokio::spawn(async move {
                pump(&shared, stream).await;
            });
            return Ok(());
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        if !is_json(&ct) {
            return Err(TransportError::protocol(format!(
                "unexpected response content-type '{ct}'"
            )));
        }
        let reply = JsonRpcMessage::parse(&body)?;
        shared.events.emit(TransportEvent::Message(reply));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closing.begin() {
            return Ok(());
        }
        self.shared.cancel.cancel();

        if let Some(id) = self.shared.session_id() {
            let req = self
                .shared
                .client
                .delete(self.shared.url.clone())
                .header(SESSION_ID_HEADER, id)
                .timeout(DELETE_TIMEOUT);
            if let Err(e) = req.send().await {
                debug!(error = %e, "session delete failed");
            }
        }

        self.shared.events.emit_closed();
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.shared.events
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.shared.events.emit_closed();
    }
}
