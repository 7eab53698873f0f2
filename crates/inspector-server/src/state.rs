//! Application state shared across handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use inspector_proxy::{
    ConnectionDescriptor, JsonRpcMessage, SessionEvent, SessionManager, SessionObserver,
    SharedTransport,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::{SseServerTransport, StreamableServerTransport};
use crate::config::ServerConfig;
use crate::error::Result;

/// Client-facing channels by session id.
///
/// Entries are dropped when the session manager reports the session gone.
#[derive(Default)]
pub struct ChannelRegistry {
    sse: Mutex<HashMap<String, Arc<SseServerTransport>>>,
    streamable: Mutex<HashMap<String, Arc<StreamableServerTransport>>>,
}

impl ChannelRegistry {
    pub fn sse(&self, session_id: &str) -> Option<Arc<SseServerTransport>> {
        self.sse.lock().get(session_id).cloned()
    }

    pub fn streamable(&self, session_id: &str) -> Option<Arc<StreamableServerTransport>> {
        self.streamable.lock().get(session_id).cloned()
    }

    /// Number of registered channels of both kinds.
    pub fn len(&self) -> usize {
        self.sse.lock().len() + self.streamable.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, session_id: &str) {
        self.sse.lock().remove(session_id);
        self.streamable.lock().remove(session_id);
    }
}

impl SessionObserver for ChannelRegistry {
    fn on_event(&self, event: &SessionEvent) {
        if let SessionEvent::Disconnected { session_id } = event {
            self.remove(session_id);
            debug!(session_id = %session_id, "client channel released");
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager owning every backend.
    pub manager: SessionManager,

    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Client-facing channels.
    pub channels: Arc<ChannelRegistry>,
}

impl AppState {
    /// Create application state and hook channel cleanup into the manager.
    pub fn new(manager: SessionManager, config: ServerConfig) -> Self {
        let channels = Arc::new(ChannelRegistry::default());
        manager.add_observer(channels.clone());
        Self {
            manager,
            config: Arc::new(config),
            channels,
        }
    }

    /// Create a session whose client speaks the legacy SSE protocol.
    pub async fn open_sse_session(
        &self,
        descriptor: &ConnectionDescriptor,
        headers: &HeaderMap,
    ) -> Result<(
        Arc<SseServerTransport>,
        mpsc::UnboundedReceiver<JsonRpcMessage>,
    )> {
        let session_id = self.manager.create_connection(descriptor, headers).await?;
        let (channel, outbound) = SseServerTransport::new(&session_id);

        self.channels
            .sse
            .lock()
            .insert(session_id.clone(), channel.clone());
        self.pair(&session_id, channel.clone()).await?;

        info!(session_id = %session_id, descriptor = %descriptor.id, "sse client connected");
        Ok((channel, outbound))
    }

    /// Create a session whose client speaks streamable HTTP.
    pub async fn open_streamable_session(
        &self,
        descriptor: &ConnectionDescriptor,
        headers: &HeaderMap,
    ) -> Result<Arc<StreamableServerTransport>> {
        let session_id = self.manager.create_connection(descriptor, headers).await?;
        let channel = StreamableServerTransport::new(&session_id);

        self.channels
            .streamable
            .lock()
            .insert(session_id.clone(), channel.clone());
        self.pair(&session_id, channel.clone()).await?;

        info!(
            session_id = %session_id,
            descriptor = %descriptor.id,
            "streamable client connected"
        );
        Ok(channel)
    }

    /// Attach a registered client channel, undoing everything on failure.
    async fn pair(&self, session_id: &str, client: SharedTransport) -> Result<()> {
        if let Err(e) = self.manager.attach_client(session_id, client) {
            self.channels.remove(session_id);
            self.manager.close_connection(session_id).await;
            return Err(e.into());
        }
        Ok(())
    }
}
