//! Serve command - runs the inspector proxy server.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use inspector_config::{InspectorConfig, LoadedConfig};
use inspector_proxy::{ProxyConfig, SessionManager, TransportKind};
use inspector_server::{Server, ServerConfig};
use tokio::net::TcpListener;
use tracing::debug;

use super::Context;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "MCP_INSPECTOR_PORT")]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long, env = "MCP_INSPECTOR_BIND")]
    pub bind: Option<String>,

    /// Allowed CORS origin, repeatable or comma-separated (overrides config)
    #[arg(long = "cors-origin", env = "MCP_INSPECTOR_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Maximum concurrent sessions (overrides config)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds to wait for a backend to become ready, 0 to wait forever
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,

    /// Default environment variable for stdio servers (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Default transport offered to the UI
    #[arg(long, value_parser = parse_transport)]
    pub transport: Option<TransportKind>,

    /// Default server URL offered to the UI
    #[arg(long)]
    pub server_url: Option<String>,

    /// Default command and arguments for stdio servers
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_transport(s: &str) -> Result<TransportKind, String> {
    TransportKind::parse(s).map_err(|e| e.to_string())
}

/// Run the serve command.
pub async fn run(args: ServeArgs, loaded: LoadedConfig, ctx: &Context) -> Result<()> {
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    if ctx.verbose {
        let sources = loaded.loaded_from();
        if sources.is_empty() {
            println!("No config files found, using defaults + CLI args");
        } else {
            for source in sources {
                println!("Loaded config: {}", source.display());
            }
        }
    }

    let resolved = resolve(&loaded.config, args)?;
    let addr = resolved.server.bind_address;
    debug!(
        max_connections = resolved.proxy.max_connections,
        connect_timeout = ?resolved.proxy.connect_timeout,
        default_command = ?resolved.server.defaults.command,
        "resolved settings"
    );

    if ctx.verbose {
        println!("Max connections: {}", resolved.proxy.max_connections);
        match resolved.proxy.connect_timeout {
            Some(timeout) => println!("Connect timeout: {:?}", timeout),
            None => println!("Connect timeout: disabled"),
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let addr = listener.local_addr()?;

    let manager = SessionManager::new(resolved.proxy);
    let server = Server::new(manager, resolved.server);

    println!("MCP Inspector proxy listening on http://{}", addr);
    println!("Press Ctrl+C to stop");

    server
        .run_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("warning: failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!("Stopped");
    Ok(())
}

/// Effective settings after CLI overrides.
#[derive(Debug)]
struct Resolved {
    proxy: ProxyConfig,
    server: ServerConfig,
}

/// Apply CLI overrides on top of config file values.
fn resolve(config: &InspectorConfig, args: ServeArgs) -> Result<Resolved> {
    let file_server = config.server();

    let port = args.port.unwrap_or(file_server.port);
    let bind = args.bind.unwrap_or(file_server.bind);
    let bind_address = parse_bind_address(&bind, port)?;

    let mut proxy = config.proxy_config();
    if let Some(max) = args.max_connections {
        if max == 0 {
            anyhow::bail!("--max-connections must be at least 1");
        }
        proxy = proxy.with_max_connections(max);
    }
    match args.connect_timeout_secs {
        Some(0) => proxy = proxy.without_connect_timeout(),
        Some(secs) => proxy = proxy.with_connect_timeout(Duration::from_secs(secs)),
        None => {}
    }

    let mut defaults = config.defaults();
    if let Some((command, rest)) = args.command.split_first() {
        defaults.command = Some(command.clone());
        defaults.args = rest.to_vec();
    }
    defaults.env.extend(args.env);
    if args.transport.is_some() {
        defaults.transport = args.transport;
    }
    if args.server_url.is_some() {
        defaults.server_url = args.server_url;
    }

    let cors_origins = if args.cors_origins.is_empty() {
        file_server.cors_origins
    } else {
        args.cors_origins
    };

    let server = ServerConfig::new()
        .with_bind_address(bind_address)
        .with_request_logging(file_server.request_logging)
        .with_cors_origins(cors_origins)
        .with_defaults(defaults);

    Ok(Resolved { proxy, server })
}

fn parse_bind_address(bind: &str, port: u16) -> Result<SocketAddr> {
    let candidate = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{bind}]:{port}")
    } else {
        format!("{bind}:{port}")
    };
    candidate
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))
}
