//! Client-facing channels.
//!
//! The browser never talks to a backend directly. Each session gets one of
//! these channels, which the session manager pairs with the backend channel.
//! Messages the browser POSTs are published on the channel's event hub;
//! messages the relay sends are written out to the browser's open stream.

pub mod sse;
pub mod streamable;

pub use sse::SseServerTransport;
pub use streamable::StreamableServerTransport;

use std::convert::Infallible;

use axum::response::sse::Event;
use inspector_proxy::JsonRpcMessage;

/// Render a message as an SSE `message` event.
pub(crate) fn message_event(message: &JsonRpcMessage) -> Option<Result<Event, Infallible>> {
    match message.to_json() {
        Ok(data) => Some(Ok(Event::default().event("message").data(data))),
        Err(e) => {
            tracing::warn!(error = %e, "dropping unserializable message");
            None
        }
    }
}
