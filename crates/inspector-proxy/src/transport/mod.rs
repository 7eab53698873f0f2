//! Channel abstraction shared by every transport kind.
//!
//! A [`Transport`] is a started-once, closed-once bidirectional message
//! channel. Outgoing traffic goes through [`Transport::send`]; everything the
//! channel observes (incoming messages, stderr output, runtime errors, close)
//! is published on its [`EventHub`], which any number of subscribers can
//! listen to independently.
//!
//! ```text
//!            send(msg)                         EventHub
//!  caller ─────────────▶ Transport ─────▶ ┌────────────────┐
//!                          │             │ subscriber #1  │ (relay)
//!                          ▼             │ subscriber #2  │ (session monitor)
//!                      peer / wire       └────────────────┘
//! ```

mod http;
pub mod memory;
pub mod sse;
pub mod stdio;
pub mod streamable_http;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

pub use memory::MemoryTransport;
pub use sse::SseTransport;
pub use stdio::{StdioParams, StdioTransport};
pub use streamable_http::StreamableHttpTransport;

/// Something observed on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived from the peer.
    Message(JsonRpcMessage),
    /// A line the backend process wrote to stderr.
    Stderr(String),
    /// A non-fatal runtime error.
    Error(String),
    /// The channel closed. Delivered at most once per subscriber.
    Closed,
}

/// Receiving half of an [`EventHub`] subscription.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Ordered multi-subscriber dispatch for channel events.
///
/// Subscribers are notified in subscription order. Adding a subscriber never
/// displaces an existing one, and a dropped receiver is pruned on the next
/// emit. Once closed, new subscribers receive `Closed` immediately.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    closed: AtomicBool,
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::SeqCst) {
            let _ = tx.send(TransportEvent::Closed);
        } else {
            subscribers.push(tx);
        }
        rx
    }

    /// Publish an event to every live subscriber.
    ///
    /// Events published after close are dropped.
    pub fn emit(&self, event: TransportEvent) {
        if matches!(event, TransportEvent::Closed) {
            self.emit_closed();
            return;
        }
        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Publish `Closed` once. Returns `true` only for the call that closed the hub.
    pub fn emit_closed(&self) -> bool {
        let mut subscribers = self.subscribers.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for tx in subscribers.drain(..) {
            let _ = tx.send(TransportEvent::Closed);
        }
        true
    }

    /// Whether `Closed` has been published.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// An abstract bidirectional message channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short label for logs (`stdio`, `sse`, ...).
    fn kind(&self) -> &'static str;

    /// Open the channel. Must be called exactly once before `send`.
    async fn start(&self) -> Result<(), TransportError>;

    /// Deliver a message to the peer.
    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError>;

    /// Close the channel and release its resources. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// The channel's event hub.
    fn events(&self) -> &EventHub;

    /// Subscribe to this channel's events.
    fn subscribe(&self) -> EventStream {
        self.events().subscribe()
    }

    /// Whether the channel has closed.
    fn is_closed(&self) -> bool {
        self.events().is_closed()
    }
}

/// A channel shared between the session registry and the relay.
pub type SharedTransport = Arc<dyn Transport>;

/// Once-only guard for `close()` implementations.
#[derive(Debug, Default)]
pub(crate) struct CloseFlag(AtomicBool);

impl CloseFlag {
    /// Returns `true` the first time only.
    pub(crate) fn begin(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
