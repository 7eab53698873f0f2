//! Builds started backend channels from connection descriptors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::descriptor::{ConnectionDescriptor, TransportConfig, validate_url};
use crate::error::{ConfigError, ProxyError, Result, TransportError};
use crate::transport::{
    SharedTransport, SseTransport, StdioParams, StdioTransport, StreamableHttpTransport,
};

/// Caller headers allowed to cross into backend requests. Matched case-insensitively.
pub const PASSTHROUGH_HEADERS: &[&str] = &[
    "authorization",
    "mcp-session-id",
    "last-event-id",
    "mcp-protocol-version",
];

#[cfg(unix)]
const DEFAULT_ENV_KEYS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

#[cfg(windows)]
const DEFAULT_ENV_KEYS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Produces started channels to backends.
///
/// The session manager depends on this trait rather than on
/// [`TransportFactory`] directly so tests can inject their own channels.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Build and start a channel for `descriptor`.
    ///
    /// `headers` is the caller's raw request headers; only
    /// [`PASSTHROUGH_HEADERS`] are forwarded.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        headers: &HeaderMap,
    ) -> Result<SharedTransport>;
}

/// The default [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct TransportFactory {
    config: ProxyConfig,
}

impl TransportFactory {
    /// Create a factory with the given limits and timeouts.
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        passthrough: &HeaderMap,
    ) -> std::result::Result<SharedTransport, BuildError> {
        let transport: SharedTransport = match &descriptor.transport {
            TransportConfig::Stdio { command, args, env } => {
                let env = merge_environment(env);
                let (program, prefix) = resolve_command(command, env.get("PATH").map(String::as_str));
                let args = prefix.into_iter().chain(args.iter().cloned()).collect();
                debug!(
                    command = %command,
                    program = %program.display(),
                    "resolved stdio command"
                );
                let params = StdioParams::new(program, args, env)
                    .with_close_timeout(self.config.close_timeout);
                Arc::new(StdioTransport::new(params))
            }
            TransportConfig::Sse { url, headers } => {
                let url = validate_url(url)?;
                let headers = build_headers("text/event-stream", headers, passthrough)?;
                Arc::new(SseTransport::new(url, headers, self.config.request_timeout)?)
            }
            TransportConfig::StreamableHttp { url, headers } => {
                let url = validate_url(url)?;
                let headers =
                    build_headers("application/json, text/event-stream", headers, passthrough)?;
                Arc::new(StreamableHttpTransport::new(
                    url,
                    headers,
                    self.config.request_timeout,
                )?)
            }
        };
        Ok(transport)
    }
}

/// Construction-time failures before a channel exists.
enum BuildError {
    Config(ConfigError),
    Transport(TransportError),
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for BuildError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[async_trait]
impl Connector for TransportFactory {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        headers: &HeaderMap,
    ) -> Result<SharedTransport> {
        let target = descriptor.target();
        let transport = match self.build(descriptor, headers) {
            Ok(transport) => transport,
            Err(BuildError::Config(e)) => {
                return Err(ProxyError::transport_creation(
                    &target,
                    TransportError::Protocol(e.to_string()),
                ));
            }
            Err(BuildError::Transport(e)) => {
                return Err(ProxyError::transport_creation(&target, e));
            }
        };

        let started = match self.config.connect_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, transport.start()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(deadline)),
            },
            None => transport.start().await,
        };

        match started {
            Ok(()) => {
                debug!(target = %target, kind = transport.kind(), "backend channel started");
                Ok(transport)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "backend channel failed to start");
                if let Err(close_err) = transport.close().await {
                    debug!(error = %close_err, "close after failed start");
                }
                Err(ProxyError::transport_creation(&target, e))
            }
        }
    }
}

/// Environment variables inherited by default.
///
/// Values that look like exported shell functions (`() { ... }`) are skipped.
pub fn default_environment() -> BTreeMap<String, String> {
    DEFAULT_ENV_KEYS
        .iter()
        .filter_map(|key| Some((key.to_string(), std::env::var(key).ok()?)))
        .filter(|(_, value)| inheritable(value))
        .collect()
}

/// Ambient process environment, then the default set, then `overrides`.
///
/// Exported shell functions are dropped from both inherited layers.
/// `overrides` are passed through as given.
pub fn merge_environment(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    layer_environment(std::env::vars(), default_environment(), overrides)
}

fn layer_environment(
    ambient: impl IntoIterator<Item = (String, String)>,
    defaults: BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = ambient
        .into_iter()
        .filter(|(_, value)| inheritable(value))
        .collect();
    env.extend(defaults);
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn inheritable(value: &str) -> bool {
    !value.starts_with("()")
}

/// Select the allow-listed headers from a caller's request.
pub fn passthrough_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in PASSTHROUGH_HEADERS.iter().copied() {
        if let Some(value) = incoming.get(name) {
            out.insert(HeaderName::from_static(name), value.clone());
        }
    }
    out
}

/// Base `accept`, then descriptor headers, then passthrough headers.
fn build_headers(
    accept: &'static str,
    descriptor_headers: &BTreeMap<String, String>,
    incoming: &HeaderMap,
) -> std::result::Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    for (key, value) in descriptor_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ConfigError::Malformed(format!("invalid header name '{key}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::Malformed(format!("invalid value for header '{key}'")))?;
        headers.insert(name, value);
    }
    for (name, value) in passthrough_headers(incoming).iter() {
        headers.insert(name.clone(), value.clone());
    }
    Ok(headers)
}

/// Find the executable for `command`, returning the program and any wrapper arguments.
///
/// Bare names are looked up on `path`. Unresolvable commands are returned
/// unchanged so the spawn error names what the user typed.
pub fn resolve_command(command: &str, path: Option<&str>) -> (PathBuf, Vec<String>) {
    let resolved = if has_separator(command) {
        PathBuf::from(command)
    } else {
        find_on_path(command, path).unwrap_or_else(|| PathBuf::from(command))
    };
    wrap_script(resolved)
}

fn has_separator(command: &str) -> bool {
    command.contains('/') || (cfg!(windows) && command.contains('\\'))
}

fn find_on_path(command: &str, path: Option<&str>) -> Option<PathBuf> {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var("PATH").ok())?;
    std::env::split_paths(&path)
        .flat_map(|dir| candidates(&dir, command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    vec![dir.join(command)]
}

#[cfg(windows)]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    let mut out = vec![dir.join(command)];
    out.extend(
        pathext
            .split(';')
            .filter(|ext| !ext.is_empty())
            .map(|ext| dir.join(format!("{command}{}", ext.to_ascii_lowercase()))),
    );
    out
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(windows)]
fn wrap_script(program: PathBuf) -> (PathBuf, Vec<String>) {
    let is_script = program
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("cmd") || e.eq_ignore_ascii_case("bat"))
        .unwrap_or(false);
    if is_script {
        let script = program.display().to_string();
        (PathBuf::from("cmd.exe"), vec!["/c".to_string(), script])
    } else {
        (program, Vec::new())
    }
}

#[cfg(not(windows))]
fn wrap_script(program: PathBuf) -> (PathBuf, Vec<String>) {
    (program, Vec::new())
}
