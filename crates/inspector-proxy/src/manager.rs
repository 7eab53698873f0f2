//! Session registry and lifecycle management.
//!
//! The [`SessionManager`] owns every live proxy session: the backend channel,
//! the optional client-facing channel, the relay wiring them together and a
//! [`ConnectionStatus`] record. It is an ordinary value, so independent
//! managers can coexist (one per server, one per test).
//!
//! # Example
//!
//! ```rust,ignore
//! use inspector_proxy::{ConnectionDescriptor, ProxyConfig, SessionManager};
//!
//! let manager = SessionManager::new(ProxyConfig::default().with_max_connections(10));
//! let descriptor = ConnectionDescriptor::stdio("fs", "Filesystem", "mcp-server-filesystem")
//!     .with_arg("/tmp");
//!
//! let session_id = manager.create_connection(&descriptor, &HeaderMap::new()).await?;
//! manager.attach_client(&session_id, client_channel)?;
//! // ...
//! manager.close_connection(&session_id).await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{ProxyError, Result};
use crate::factory::{Connector, TransportFactory};
use crate::relay::{RelayHandle, TracingErrorSink, wire};
use crate::status::{ConnectionState, ConnectionStatus};
use crate::transport::{EventStream, SharedTransport, TransportEvent};

/// Something that happened to a session, delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The backend channel started.
    Connected { session_id: String },
    /// A channel reported a runtime error. The session stays open.
    Error { session_id: String, error: String },
    /// The session closed and was removed.
    Disconnected { session_id: String },
}

impl SessionEvent {
    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Connected { session_id }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::Disconnected { session_id } => session_id,
        }
    }
}

/// Receives [`SessionEvent`]s. Observers are called in registration order.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_event(&self, event: &SessionEvent);
}

struct SessionEntry {
    status: ConnectionStatus,
    server: Option<SharedTransport>,
    client: Option<SharedTransport>,
    relay: Option<RelayHandle>,
}

struct Inner {
    config: ProxyConfig,
    connector: Arc<dyn Connector>,
    registry: Mutex<HashMap<String, SessionEntry>>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}

impl Inner {
    fn notify(&self, event: SessionEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut ConnectionStatus)) {
        if let Some(entry) = self.registry.lock().get_mut(session_id) {
            f(&mut entry.status);
        }
    }

    async fn close(&self, session_id: &str) {
        let Some(mut entry) = self.registry.lock().remove(session_id) else {
            return;
        };
        entry.status.transition(ConnectionState::Disconnected);
        debug!(session_id = %session_id, "closing session");

        let channels: Vec<SharedTransport> = entry
            .client
            .take()
            .into_iter()
            .chain(entry.server.take())
            .collect();
        let results = join_all(channels.iter().map(|channel| channel.close())).await;
        for result in results {
            if let Err(e) = result {
                warn!(session_id = %session_id, error = %e, "error while closing channel");
            }
        }
        drop(entry.relay.take());

        info!(session_id = %session_id, "session closed");
        self.notify(SessionEvent::Disconnected {
            session_id: session_id.to_string(),
        });
    }

    /// React to the backend channel closing.
    ///
    /// A paired session is torn down. An unpaired one stays registered as
    /// `disconnected` until it is closed explicitly or a client attaches.
    async fn backend_closed(&self, session_id: &str) {
        let paired = {
            let mut registry = self.registry.lock();
            match registry.get_mut(session_id) {
                Some(entry) if entry.client.is_none() => {
                    entry.status.transition(ConnectionState::Disconnected);
                    false
                }
                Some(_) => true,
                None => return,
            }
        };
        if paired {
            self.close(session_id).await;
        } else {
            info!(session_id = %session_id, "backend exited before a client attached");
        }
    }
}

/// Removes a `connecting` entry if the create future is abandoned or fails.
struct Reservation {
    inner: Arc<Inner>,
    session_id: String,
    armed: bool,
}

impl Reservation {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed && self.inner.registry.lock().remove(&self.session_id).is_some() {
            debug!(session_id = %self.session_id, "released connection reservation");
        }
    }
}

/// Owns all proxy sessions.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.inner.config)
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl SessionManager {
    /// Create a manager that builds channels with [`TransportFactory`].
    pub fn new(config: ProxyConfig) -> Self {
        let connector = Arc::new(TransportFactory::new(config.clone()));
        Self::with_connector(config, connector)
    }

    /// Create a manager with a custom channel source.
    pub fn with_connector(config: ProxyConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                registry: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Register an observer. Existing observers are kept.
    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Validate `descriptor`, admit it, and connect its backend.
    ///
    /// Admission is atomic: the limit check and the `connecting` reservation
    /// happen under one lock, so concurrent callers never exceed
    /// `max_connections`. On failure nothing stays registered.
    pub async fn create_connection(
        &self,
        descriptor: &ConnectionDescriptor,
        headers: &HeaderMap,
    ) -> Result<String> {
        descriptor.validate()?;

        let session_id = Uuid::new_v4().to_string();
        {
            let mut registry = self.inner.registry.lock();
            let limit = self.inner.config.max_connections;
            if registry.len() >= limit {
                warn!(limit, descriptor = %descriptor.id, "connection limit reached");
                return Err(ProxyError::Admission { limit });
            }
            registry.insert(
                session_id.clone(),
                SessionEntry {
                    status: ConnectionStatus::connecting(
                        &session_id,
                        &descriptor.id,
                        &descriptor.name,
                        descriptor.kind(),
                    ),
                    server: None,
                    client: None,
                    relay: None,
                },
            );
        }
        let reservation = Reservation {
            inner: self.inner.clone(),
            session_id: session_id.clone(),
            armed: true,
        };

        debug!(
            session_id = %session_id,
            descriptor = %descriptor.id,
            kind = %descriptor.kind(),
            "connecting backend"
        );
        let server = match self.inner.connector.connect(descriptor, headers).await {
            Ok(server) => server,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "backend connection failed");
                return Err(e);
            }
        };
        reservation.disarm();

        // Subscribe before publishing so an early close is never missed.
        let events = server.subscribe();
        let registered = match self.inner.registry.lock().get_mut(&session_id) {
            Some(entry) => {
                entry.server = Some(server.clone());
                entry.status.transition(ConnectionState::Connected);
                true
            }
            None => false,
        };
        if !registered {
            info!(session_id = %session_id, "session closed while connecting");
            if let Err(e) = server.close().await {
                debug!(error = %e, "close of cancelled backend failed");
            }
            return Err(ProxyError::Cancelled(session_id));
        }

        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            session_id.clone(),
            events,
            true,
        ));

        info!(
            session_id = %session_id,
            descriptor = %descriptor.id,
            kind = %descriptor.kind(),
            "session connected"
        );
        self.inner.notify(SessionEvent::Connected {
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    /// Pair a client-facing channel with a session and start relaying.
    ///
    /// If the backend already exited, the pairing still succeeds and the
    /// session is then closed, which closes `client` too.
    pub fn attach_client(&self, session_id: &str, client: SharedTransport) -> Result<()> {
        let events = client.subscribe();
        let backend_gone = {
            let mut registry = self.inner.registry.lock();
            let entry = registry
                .get_mut(session_id)
                .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()))?;
            if entry.client.is_some() {
                return Err(ProxyError::AlreadyPaired(session_id.to_string()));
            }
            let server = entry
                .server
                .clone()
                .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()))?;

            entry.relay = Some(wire(
                client.clone(),
                server,
                Arc::new(TracingErrorSink::new(session_id)),
            ));
            entry.client = Some(client);
            entry.status.paired = true;
            entry.status.touch();
            entry.status.state == ConnectionState::Disconnected
        };

        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            session_id.to_string(),
            events,
            false,
        ));
        debug!(session_id = %session_id, "client attached");

        if backend_gone {
            let inner = self.inner.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move { inner.close(&session_id).await });
        }
        Ok(())
    }

    /// Close a session. Unknown ids are a no-op.
    pub async fn close_connection(&self, session_id: &str) {
        self.inner.close(session_id).await;
    }

    /// Close every session concurrently and wait for all of them.
    pub async fn close_all_connections(&self) {
        let ids: Vec<String> = self.inner.registry.lock().keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "closing all sessions");
        join_all(ids.iter().map(|id| self.inner.close(id))).await;
    }

    /// Ids of sessions past the connecting stage, including unpaired ones
    /// whose backend has already exited.
    pub fn active_connections(&self) -> Vec<String> {
        let registry = self.inner.registry.lock();
        let mut ids: Vec<String> = registry
            .iter()
            .filter(|(_, entry)| entry.server.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Status of one session.
    pub fn status(&self, session_id: &str) -> Option<ConnectionStatus> {
        self.inner
            .registry
            .lock()
            .get(session_id)
            .map(|entry| entry.status.clone())
    }

    /// Status of every session, including those still connecting.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut statuses: Vec<ConnectionStatus> = self
            .inner
            .registry
            .lock()
            .values()
            .map(|entry| entry.status.clone())
            .collect();
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        statuses
    }

    /// Backend channel of a session.
    pub fn transport(&self, session_id: &str) -> Option<SharedTransport> {
        self.inner
            .registry
            .lock()
            .get(session_id)
            .and_then(|entry| entry.server.clone())
    }

    /// Client-facing channel of a session.
    pub fn client_transport(&self, session_id: &str) -> Option<SharedTransport> {
        self.inner
            .registry
            .lock()
            .get(session_id)
            .and_then(|entry| entry.client.clone())
    }

    /// Number of registered sessions, including reservations.
    pub fn session_count(&self) -> usize {
        self.inner.registry.lock().len()
    }
}

/// Track one channel's events against the session status.
async fn monitor(inner: Weak<Inner>, session_id: String, mut events: EventStream, backend: bool) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(_) | TransportEvent::Stderr(_) => {
                inner.update(&session_id, ConnectionStatus::touch);
            }
            TransportEvent::Error(error) => {
                if backend {
                    inner.update(&session_id, |status| status.record_error(error.clone()));
                }
                inner.notify(SessionEvent::Error {
                    session_id: session_id.clone(),
                    error,
                });
            }
            TransportEvent::Closed => {
                debug!(
                    session_id = %session_id,
                    side = if backend { "server" } else { "client" },
                    "channel closed"
                );
                if backend {
                    inner.backend_closed(&session_id).await;
                } else {
                    inner.close(&session_id).await;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionDescriptor;
    use crate::transport::{MemoryTransport, Transport};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Hands out memory channels after an optional gate, keeping the far ends.
    #[derive(Default)]
    struct MemoryConnector {
        delay: Option<Duration>,
        gate: Option<Arc<Notify>>,
        backends: Mutex<Vec<Arc<MemoryTransport>>>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(
            &self,
            _descriptor: &ConnectionDescriptor,
            _headers: &HeaderMap,
        ) -> Result<SharedTransport> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let (near, far) = MemoryTransport::pair();
            self.backends.lock().push(far);
            Ok(near)
        }
    }

    #[derive(Default)]
    struct RecordingObserver(Mutex<Vec<SessionEvent>>);

    impl SessionObserver for RecordingObserver {
        fn on_event(&self, event: &SessionEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::stdio("a", "A", "mock")
    }

    fn manager(limit: usize, connector: MemoryConnector) -> (SessionManager, Arc<MemoryConnector>) {
        let connector = Arc::new(connector);
        let manager = SessionManager::with_connector(
            ProxyConfig::default().with_max_connections(limit),
            connector.clone(),
        );
        (manager, connector)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_create_and_close_idempotent() {
        let (manager, _) = manager(5, MemoryConnector::default());
        let observer = Arc::new(RecordingObserver::default());
        manager.add_observer(observer.clone());

        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(manager.active_connections(), vec![id.clone()]);
        let status = manager.status(&id).unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.descriptor_id, "a");

        manager.close_connection(&id).await;
        manager.close_connection(&id).await;
        assert!(manager.active_connections().is_empty());
        assert!(manager.status(&id).is_none());

        let events = observer.0.lock().clone();
        assert_eq!(
            events,
            vec![
                SessionEvent::Connected { session_id: id.clone() },
                SessionEvent::Disconnected { session_id: id },
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_descriptor_registers_nothing() {
        let (manager, _) = manager(5, MemoryConnector::default());
        let err = manager
            .create_connection(&ConnectionDescriptor::stdio("a", "A", ""), &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "config_error");
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_admission_limit_and_recovery() {
        let (manager, _) = manager(2, MemoryConnector::default());
        let a = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
        manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();

        let err = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Admission { limit: 2 }));

        manager.close_connection(&a).await;
        manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_exceed_limit() {
        let limit = 3;
        let (manager, _) = manager(
            limit,
            MemoryConnector {
                delay: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );
        let descriptor = descriptor();
        let headers = HeaderMap::new();

        let results = join_all(
            (0..limit * 2).map(|_| manager.create_connection(&descriptor, &headers)),
        )
        .await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(ProxyError::Admission { .. })))
            .count();
        assert_eq!(ok, limit);
        assert_eq!(rejected, limit);
        assert_eq!(manager.session_count(), limit);
    }

    #[tokio::test]
    async fn test_unpaired_backend_close_keeps_session_until_closed() {
        let (manager, connector) = manager(5, MemoryConnector::default());
        let observer = Arc::new(RecordingObserver::default());
        manager.add_observer(observer.clone());
        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();

        let far = connector.backends.lock()[0].clone();
        far.close().await.unwrap();

        wait_until(|| {
            manager.status(&id).map(|s| s.state) == Some(ConnectionState::Disconnected)
        })
        .await;
        assert_eq!(manager.active_connections(), vec![id.clone()]);
        let disconnected = SessionEvent::Disconnected {
            session_id: id.clone(),
        };
        assert!(!observer.0.lock().contains(&disconnected));

        manager.close_connection(&id).await;
        assert!(manager.status(&id).is_none());
        assert!(observer.0.lock().contains(&disconnected));
    }

    #[tokio::test]
    async fn test_paired_backend_close_removes_session() {
        let (manager, connector) = manager(5, MemoryConnector::default());
        let observer = Arc::new(RecordingObserver::default());
        manager.add_observer(observer.clone());
        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
        let (client, browser) = MemoryTransport::pair();
        manager.attach_client(&id, client).unwrap();

        let far = connector.backends.lock()[0].clone();
        far.close().await.unwrap();

        wait_until(|| manager.status(&id).is_none()).await;
        assert!(browser.is_closed());
        assert!(
            observer
                .0
                .lock()
                .contains(&SessionEvent::Disconnected { session_id: id })
        );
    }

    #[tokio::test]
    async fn test_attach_after_backend_exit_closes_session() {
        let (manager, connector) = manager(5, MemoryConnector::default());
        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
        let far = connector.backends.lock()[0].clone();
        far.close().await.unwrap();
        wait_until(|| {
            manager.status(&id).map(|s| s.state) == Some(ConnectionState::Disconnected)
        })
        .await;

        let (client, browser) = MemoryTransport::pair();
        manager.attach_client(&id, client).unwrap();

        wait_until(|| manager.status(&id).is_none()).await;
        assert!(browser.is_closed());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_error_counts_but_keeps_session() {
        let (manager, _) = manager(5, MemoryConnector::default());
        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();
        let server = manager.transport(&id).unwrap();
        server.events().emit(TransportEvent::Error("bad frame".into()));
        server.events().emit(TransportEvent::Error("bad frame again".into()));

        wait_until(|| manager.status(&id).map(|s| s.error_count) == Some(2)).await;
        let status = manager.status(&id).unwrap();
        assert_eq!(status.state, ConnectionState::Error);
        assert_eq!(status.last_error.as_deref(), Some("bad frame again"));
        assert_eq!(manager.active_connections(), vec![id]);
    }

    #[tokio::test]
    async fn test_close_while_connecting_cancels() {
        let gate = Arc::new(Notify::new());
        let (manager, connector) = manager(
            5,
            MemoryConnector {
                gate: Some(gate.clone()),
                ..Default::default()
            },
        );

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .create_connection(&descriptor(), &HeaderMap::new())
                    .await
            })
        };
        wait_until(|| manager.session_count() == 1).await;
        let id = manager.statuses()[0].session_id.clone();
        assert_eq!(manager.statuses()[0].state, ConnectionState::Connecting);
        assert!(manager.active_connections().is_empty());

        manager.close_connection(&id).await;
        gate.notify_one();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ProxyError::Cancelled(_))));
        assert_eq!(manager.session_count(), 0);
        assert!(connector.backends.lock()[0].is_closed());
    }

    #[tokio::test]
    async fn test_dropped_create_releases_reservation() {
        let gate = Arc::new(Notify::new());
        let (manager, _) = manager(
            1,
            MemoryConnector {
                gate: Some(gate),
                ..Default::default()
            },
        );
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            manager.create_connection(&descriptor(), &HeaderMap::new()),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_client_relays_and_pairs_once() {
        let (manager, connector) = manager(5, MemoryConnector::default());
        let id = manager
            .create_connection(&descriptor(), &HeaderMap::new())
            .await
            .unwrap();

        let (client, browser) = MemoryTransport::pair();
        manager.attach_client(&id, client).unwrap();
        assert!(manager.status(&id).unwrap().paired);

        let (other, _) = MemoryTransport::pair();
        assert!(matches!(
            manager.attach_client(&id, other),
            Err(ProxyError::AlreadyPaired(_))
        ));
        let (other, _) = MemoryTransport::pair();
        assert!(matches!(
            manager.attach_client("missing", other),
            Err(ProxyError::SessionNotFound(_))
        ));

        let far = connector.backends.lock()[0].clone();
        let mut far_rx = far.subscribe();
        let msg = crate::protocol::JsonRpcMessage::notification("ping", None);
        browser.send(msg.clone()).await.unwrap();
        assert_eq!(far_rx.recv().await, Some(TransportEvent::Message(msg)));

        // Client going away tears the whole session down.
        browser.close().await.unwrap();
        wait_until(|| manager.status(&id).is_none()).await;
        assert!(far.is_closed());
    }

    #[tokio::test]
    async fn test_close_all() {
        let (manager, connector) = manager(5, MemoryConnector::default());
        for _ in 0..3 {
            manager
                .create_connection(&descriptor(), &HeaderMap::new())
                .await
                .unwrap();
        }
        manager.close_all_connections().await;
        assert_eq!(manager.session_count(), 0);
        assert!(connector.backends.lock().iter().all(|b| b.is_closed()));
    }
}
