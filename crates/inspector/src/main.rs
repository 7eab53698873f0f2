//! MCP Inspector proxy
//!
//! Main entry point for the `mcp-inspector` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use inspector_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{check, serve};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// MCP Inspector - proxy between inspector clients and MCP servers
#[derive(Parser)]
#[command(name = "mcp-inspector")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to config file (overrides default discovery)
    #[arg(long, global = true, env = "MCP_INSPECTOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the inspector proxy server
    Serve(serve::ServeArgs),

    /// Validate the saved server entries in the config
    Check(check::CheckArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = commands::Context {
        config_path: cli.config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => {
            let loaded = commands::load_config(&ctx)?;
            let _guard = init_tracing(ctx.verbose, &loaded.config.logging());
            serve::run(args, loaded, &ctx).await
        }
        Commands::Check(args) => {
            let console_only = LoggingConfig {
                file: false,
                ..LoggingConfig::default()
            };
            let _guard = init_tracing(ctx.verbose, &console_only);
            check::run(args, &ctx)
        }
    }
}

const CRATES: [&str; 4] = [
    "mcp_inspector",
    "inspector_proxy",
    "inspector_server",
    "inspector_config",
];

fn filter_for(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    directives.push(fallback.to_string());
    directives.join(",")
}

/// Install tracing: human-readable console output plus an optional rotating
/// JSON file under the config directory.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let console_filter = if verbose {
        EnvFilter::new(filter_for("debug", "info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_for(&logging.level, "warn")))
    };

    let (file_layer, guard) = if logging.file {
        let log_dir = inspector_config::config_dir()
            .map(|d| d.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "mcp-inspector.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(filter_for("trace", "info")));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}
