//! In-process channel pair, used to wire sessions in tests and embedders.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CloseFlag, EventHub, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::JsonRpcMessage;

/// One end of a linked in-memory channel pair.
///
/// Messages sent on one end arrive as [`TransportEvent::Message`] on the
/// other. Closing either end closes both.
pub struct MemoryTransport {
    events: EventHub,
    peer: Mutex<Weak<MemoryTransport>>,
    started: CloseFlag,
    closing: CloseFlag,
}

impl MemoryTransport {
    fn unlinked() -> Self {
        Self {
            events: EventHub::new(),
            peer: Mutex::new(Weak::new()),
            started: CloseFlag::default(),
            closing: CloseFlag::default(),
        }
    }

    /// Create two linked ends.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::unlinked());
        let b = Arc::new(Self::unlinked());
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn peer(&self) -> Option<Arc<MemoryTransport>> {
        self.peer.lock().upgrade()
    }

    /// Inject an event on this end as if the peer had produced it.
    pub fn inject(&self, event: TransportEvent) {
        self.events.emit(event);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if !self.started.begin() {
            return Err(TransportError::AlreadyStarted);
        }
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.peer() {
            Some(peer) if !peer.events.is_closed() => {
                peer.events.emit(TransportEvent::Message(message));
                Ok(())
            }
            _ => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closing.begin() {
            return Ok(());
        }
        self.events.emit_closed();
        if let Some(peer) = self.peer() {
            peer.close().await?;
        }
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}
