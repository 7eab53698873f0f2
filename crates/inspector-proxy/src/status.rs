//! Per-session status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::TransportKind;

/// Lifecycle state of a session.
///
/// `Connecting -> Connected -> Error* -> Disconnected`, after which the
/// session is removed. An unpaired session whose backend exited lingers in
/// `Disconnected` until closed. A failed creation goes straight from
/// `Connecting` to removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

/// Snapshot of one session's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub session_id: String,
    pub state: ConnectionState,
    /// Last time anything happened on the session.
    pub last_activity: DateTime<Utc>,
    /// Number of runtime error signals seen.
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Descriptor the session was created from.
    pub descriptor_id: String,
    pub name: String,
    pub kind: TransportKind,
    /// Whether a client-facing channel is attached.
    pub paired: bool,
}

impl ConnectionStatus {
    pub(crate) fn connecting(
        session_id: impl Into<String>,
        descriptor_id: impl Into<String>,
        name: impl Into<String>,
        kind: TransportKind,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: ConnectionState::Connecting,
            last_activity: Utc::now(),
            error_count: 0,
            last_error: None,
            descriptor_id: descriptor_id.into(),
            name: name.into(),
            kind,
            paired: false,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub(crate) fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        self.touch();
    }

    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.transition(ConnectionState::Error);
    }
}
