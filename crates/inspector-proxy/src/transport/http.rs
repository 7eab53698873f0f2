//! Helpers shared by the HTTP-backed channels.

use std::pin::Pin;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::error::TransportError;

/// Cap on how much of an error body is kept for diagnostics.
const ERROR_BODY_PREVIEW_BYTES: usize = 512;

/// Build the shared HTTP client. Proxy environment variables are ignored so a
/// local inspector never routes loopback backends through a corporate proxy.
pub(crate) fn build_client(headers: HeaderMap) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .no_proxy()
        .default_headers(headers)
        .build()
        .map_err(|e| TransportError::Request(format!("failed to build http client: {e}")))
}

/// Content type of a response, or `""`.
pub(crate) fn content_type(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Server-sent events decoded from a response body.
pub(crate) type SseEvents =
    Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

/// Decode a `text/event-stream` response body.
pub(crate) fn sse_events(resp: reqwest::Response) -> SseEvents {
    Box::pin(resp.bytes_stream().eventsource())
}

/// Whether an event uses the default `message` type.
pub(crate) fn is_message_event(event: &Event) -> bool {
    event.event.is_empty() || event.event == "message"
}

/// Whether a content type denotes an event stream.
pub(crate) fn is_event_stream(content_type: &str) -> bool {
    media_type(content_type).eq_ignore_ascii_case("text/event-stream")
}

/// Whether a content type denotes JSON.
pub(crate) fn is_json(content_type: &str) -> bool {
    let ct = media_type(content_type);
    ct.eq_ignore_ascii_case("application/json")
        || ct.to_ascii_lowercase().ends_with("+json")
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Turn a non-success response into [`TransportError::Http`] with a body preview.
pub(crate) async fn status_error(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    let body = body_preview(resp).await;
    TransportError::Http { status, body }
}

async fn body_preview(resp: reqwest::Response) -> String {
    let mut out = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let take = (ERROR_BODY_PREVIEW_BYTES - out.len()).min(chunk.len());
        out.extend_from_slice(&chunk[..take]);
        if out.len() >= ERROR_BODY_PREVIEW_BYTES {
            break;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_helpers() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("Text/Event-Stream; charset=utf-8"));
        assert!(!is_event_stream("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/html"));
    }

    #[tokio::test]
    async fn test_event_stream_decoding() {
        let body = concat!(
            "event: endpoint\n",
            "data: /message?sessionId=abc\n",
            "\n",
            ": keep-alive comment\n",
            "data: a\r\n",
            "data: b\r\n",
            "\r\n",
        );
        let chunks = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok::<_, std::convert::Infallible>(c.to_vec()))
            .collect::<Vec<_>>();
        let events: Vec<Event> = futures::stream::iter(chunks)
            .eventsource()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert!(!is_message_event(&events[0]));
        assert_eq!(events[0].data, "/message?sessionId=abc");
        assert!(is_message_event(&events[1]));
        assert_eq!(events[1].data, "a\nb");
    }
}
