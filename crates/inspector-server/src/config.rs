//! Server configuration.

use std::net::SocketAddr;

use inspector_config::DefaultsConfig;

/// Default max body size for POSTed messages (4 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Enable request logging.
    pub request_logging: bool,

    /// CORS allowed origins (empty = no CORS).
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Values served from `/config` for the UI to pre-fill.
    pub defaults: DefaultsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], inspector_config::DEFAULT_PORT)),
            request_logging: true,
            cors_origins: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            defaults: DefaultsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a server config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set CORS allowed origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Set the maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the connection defaults served to the UI.
    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address.port(), inspector_config::DEFAULT_PORT);
        assert!(config.bind_address.ip().is_loopback());
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_request_logging(false)
            .with_cors_origins(vec!["http://localhost:6274".to_string()])
            .with_max_body_size(1024);

        assert_eq!(config.bind_address.port(), 9000);
        assert!(!config.request_logging);
        assert_eq!(config.cors_origins.len(), 1);
        assert_eq!(config.max_body_size, 1024);
    }
}
