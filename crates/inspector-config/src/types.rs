//! Configuration types.

use std::collections::BTreeMap;
use std::time::Duration;

use inspector_proxy::{ConnectionDescriptor, ProxyConfig, TransportKind};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 6277;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,
    /// Saved connection descriptors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ConnectionDescriptor>,
}

impl InspectorConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: InspectorConfig = toml::from_str(toml_str)?;
        config.check()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole. Saved servers are merged by id, so a
    /// later layer can redefine a single entry.
    pub fn merge(&mut self, other: InspectorConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }

        if other.defaults.is_some() {
            self.defaults = other.defaults;
        }

        for server in other.servers {
            match self.servers.iter_mut().find(|s| s.id == server.id) {
                Some(existing) => *existing = server,
                None => self.servers.push(server),
            }
        }
    }

    /// Server section, or defaults.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Logging section, or defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Defaults section, or an empty one.
    pub fn defaults(&self) -> DefaultsConfig {
        self.defaults.clone().unwrap_or_default()
    }

    /// Build the session manager configuration.
    pub fn proxy_config(&self) -> ProxyConfig {
        self.proxy.clone().unwrap_or_default().to_proxy_config()
    }

    /// Look up a saved server by id.
    pub fn find_server(&self, id: &str) -> Option<&ConnectionDescriptor> {
        self.servers.iter().find(|s| s.id == id)
    }

    fn check(&self) -> Result<()> {
        if let Some(ref proxy) = self.proxy
            && proxy.max_connections == Some(0)
        {
            return Err(ConfigError::Invalid {
                field: "proxy.max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "servers.id".to_string(),
                    reason: format!("server '{}' has no id", server.name),
                });
            }
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "servers.id".to_string(),
                    reason: format!("duplicate id '{}'", server.id),
                });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind to.
    pub bind: String,
    /// Allowed CORS origins. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,
    /// Enable request logging.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cors_origins: Vec::new(),
            request_logging: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session manager limits. Unset fields fall back to the proxy defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Seconds to wait for a backend to become ready. `0` disables the deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_timeout_secs: Option<u64>,
}

impl ProxySection {
    pub fn to_proxy_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        if let Some(max) = self.max_connections {
            config = config.with_max_connections(max);
        }
        match self.connect_timeout_secs {
            Some(0) => config = config.without_connect_timeout(),
            Some(secs) => config = config.with_connect_timeout(Duration::from_secs(secs)),
            None => {}
        }
        if let Some(secs) = self.close_timeout_secs {
            config = config.with_close_timeout(Duration::from_secs(secs));
        }
        config
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write JSON logs to daily files under the config directory.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Values the UI pre-fills when opening a new connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub transport: Option<TransportKind>,
    pub server_url: Option<String>,
}
