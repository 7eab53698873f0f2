//! Configuration system for the MCP inspector.
//!
//! Provides TOML-based configuration with:
//! - `[server]` listener settings for the HTTP surface
//! - `[proxy]` limits and deadlines for the session manager
//! - `[logging]` level and file output
//! - `[defaults]` pre-filled connection values served to the UI
//! - `[[servers]]` saved connection descriptors
//!
//! Files are layered: the user config directory first, then a
//! project-local `mcp-inspector.toml`. CLI flags override both.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, config_dir, config_path, load_config, load_config_file,
    load_config_with_options,
};
pub use error::{ConfigError, Result};
pub use types::*;
