//! Configuration for the session manager and transport factory.

use std::time::Duration;

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;

/// Default deadline for a backend channel to become ready.
pub const DEFAULT_CONNECT_TIMEOUT: Option<Duration> = Some(Duration::from_secs(30));

/// Default time to wait for a killed child process to be reaped.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Maximum number of sessions (connecting or live) at any moment.
    pub max_connections: usize,

    /// Deadline for a backend channel to report readiness.
    /// `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// How long `close()` waits for a child process to exit after killing it.
    pub close_timeout: Duration,

    /// Per-request timeout for HTTP POSTs to backends. `None` disables it.
    pub request_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl ProxyConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of concurrent sessions.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection-establishment deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Disable the connection-establishment deadline.
    pub fn without_connect_timeout(mut self) -> Self {
        self.connect_timeout = None;
        self
    }

    /// Set how long to wait for a child process to exit on close.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the per-request HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}
