//! Error types for proxy operations.
//!
//! Three layers of errors exist:
//! - [`ConfigError`]: a connection descriptor is malformed.
//! - [`TransportError`]: a channel failed to start, send or close.
//! - [`ProxyError`]: what session-level callers see. Every variant carries a
//!   stable [`category`](ProxyError::category) plus a human message, with the
//!   raw cause available through [`detail`](ProxyError::detail).

use std::time::Duration;

use thiserror::Error;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// A connection descriptor failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required field is absent or empty.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// The declared transport kind is not one we know.
    #[error("unknown transport kind '{0}' (expected stdio, sse or streamable-http)")]
    UnknownKind(String),

    /// A field that belongs to a different transport kind was supplied.
    #[error("field '{field}' is not valid for {kind} transport")]
    UnexpectedField {
        /// Offending field name.
        field: &'static str,
        /// Declared transport kind.
        kind: &'static str,
    },

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// The URL as supplied.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The descriptor could not be decoded at all.
    #[error("malformed descriptor: {0}")]
    Malformed(String),
}

/// Error raised by a channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The child process could not be spawned.
    #[error("failed to spawn '{command}': {reason}")]
    SpawnFailed {
        /// Command that was resolved and spawned.
        command: String,
        /// Underlying cause.
        reason: String,
    },

    /// Nothing accepted the TCP connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The HTTP request itself failed (DNS, TLS, reset, ...).
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Body preview.
        body: String,
    },

    /// The channel did not become ready before the deadline.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Peer violated the wire format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel is closed.
    #[error("channel closed")]
    Closed,

    /// `send` was called before `start`.
    #[error("channel not started")]
    NotStarted,

    /// `start` was called twice.
    #[error("channel already started")]
    AlreadyStarted,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Classify a reqwest error, singling out refused connections.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Request(format!("request timed out: {err}"));
        }
        if err.is_connect() && is_connection_refused(err) {
            return Self::ConnectionRefused(err.to_string());
        }
        Self::Request(err.to_string())
    }

    /// Whether this error is the network-refusal signature.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_))
    }
}

fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("connection refused") || text.contains("econnrefused") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Error type for session-level proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Descriptor rejected by validation.
    #[error("invalid connection config: {0}")]
    Config(#[from] ConfigError),

    /// Too many live sessions.
    #[error("connection limit reached: {limit} sessions already active")]
    Admission {
        /// Configured maximum.
        limit: usize,
    },

    /// The backend channel could not be created or started.
    #[error("{message}")]
    TransportCreation {
        /// User-facing message.
        message: String,
        /// Underlying cause.
        #[source]
        cause: TransportError,
    },

    /// A relayed message could not be delivered.
    #[error("relay failed: {0}")]
    Relay(String),

    /// No session with this id exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session already has a client-facing channel.
    #[error("session {0} already has a client attached")]
    AlreadyPaired(String),

    /// The session was closed while its backend was still connecting.
    #[error("session {0} was closed before the connection completed")]
    Cancelled(String),
}

impl ProxyError {
    /// Build a creation error, rewording network refusals.
    pub fn transport_creation(target: &str, cause: TransportError) -> Self {
        let message = match &cause {
            TransportError::ConnectionRefused(_) => format!(
                "Connection refused by {target}. Is the MCP server running and reachable?"
            ),
            TransportError::Timeout(after) => {
                format!("Timed out after {after:?} waiting for {target} to become ready")
            }
            other => format!("Failed to connect to {target}: {other}"),
        };
        Self::TransportCreation { message, cause }
    }

    /// Stable machine-readable category.
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Config(_) => "config_error",
            ProxyError::Admission { .. } => "admission_error",
            ProxyError::TransportCreation { .. } => "transport_creation_error",
            ProxyError::Relay(_) => "relay_error",
            ProxyError::SessionNotFound(_) => "session_not_found",
            ProxyError::AlreadyPaired(_) => "session_already_paired",
            ProxyError::Cancelled(_) => "connection_cancelled",
        }
    }

    /// Raw underlying cause, when it differs from the primary message.
    pub fn detail(&self) -> Option<String> {
        match self {
            ProxyError::TransportCreation { cause, .. } => Some(cause.to_string()),
            _ => None,
        }
    }
}
