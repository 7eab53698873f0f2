//! CLI command handlers.

pub mod check;
pub mod serve;

use std::path::PathBuf;

use anyhow::Result;
use inspector_config::LoadedConfig;
use inspector_config::discovery::ConfigSource;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Load the explicit config file, or discover and merge the usual layers.
pub fn load_config(ctx: &Context) -> Result<LoadedConfig> {
    match ctx.config_path {
        Some(ref path) => {
            let config = inspector_config::load_config_file(path)?;
            Ok(LoadedConfig {
                config,
                sources: vec![ConfigSource {
                    path: path.clone(),
                    loaded: true,
                }],
                warnings: Vec::new(),
            })
        }
        None => Ok(inspector_config::load_config(None)?),
    }
}
