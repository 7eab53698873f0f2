//! Connection descriptors and their validation.
//!
//! A [`ConnectionDescriptor`] names a backend and says how to reach it. The
//! transport-specific fields live in [`TransportConfig`], a tagged union, so a
//! stdio descriptor can never carry a URL and an HTTP descriptor can never
//! carry a command.
//!
//! ```toml
//! id = "fs"
//! name = "Filesystem"
//! kind = "stdio"
//! command = "mcp-server-filesystem"
//! args = ["/home/user/projects"]
//! env = { DEBUG = "1" }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Transport kind of a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child process speaking over stdin/stdout.
    Stdio,
    /// Legacy server-sent-events stream plus POST endpoint.
    Sse,
    /// Streamable HTTP.
    StreamableHttp,
}

impl TransportKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "streamable-http" | "streamable_http" | "http" => Ok(TransportKind::StreamableHttp),
            other => Err(ConfigError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific connection fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Spawn a child process.
    Stdio {
        /// Executable to run.
        command: String,
        /// Arguments passed to the executable.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Environment overrides (highest precedence).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Connect to a server-sent-events endpoint.
    Sse {
        /// Stream URL.
        url: String,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Connect to a streamable HTTP endpoint.
    StreamableHttp {
        /// Endpoint URL.
        url: String,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    /// The kind tag of this config.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }
}

/// Everything needed to reach one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct ConnectionDescriptor {
    /// Unique identifier (assigned by whoever stores descriptors).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// How to connect.
    #[serde(flatten)]
    pub transport: TransportConfig,
}

impl ConnectionDescriptor {
    /// Create a stdio descriptor.
    pub fn stdio(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        }
    }

    /// Create an SSE descriptor.
    pub fn sse(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport: TransportConfig::Sse {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        }
    }

    /// Create a streamable HTTP descriptor.
    pub fn streamable_http(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            transport: TransportConfig::StreamableHttp {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        }
    }

    /// Add a command-line argument.
    ///
    /// Only stdio descriptors carry arguments. On an SSE or streamable HTTP
    /// descriptor the argument is dropped and a warning is logged.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Stdio { args, .. } => args.push(arg.into()),
            other => warn_dropped("argument", other.kind()),
        }
        self
    }

    /// Add an environment override for the child process.
    ///
    /// Only stdio descriptors carry an environment. On an SSE or streamable
    /// HTTP descriptor the entry is dropped and a warning is logged.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Stdio { env, .. } => {
                env.insert(key.into(), value.into());
            }
            other => warn_dropped("environment entry", other.kind()),
        }
        self
    }

    /// Add a request header sent with every backend request.
    ///
    /// Only SSE and streamable HTTP descriptors carry headers. On a stdio
    /// descriptor the header is dropped and a warning is logged.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Sse { headers, .. }
            | TransportConfig::StreamableHttp { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
            TransportConfig::Stdio { .. } => warn_dropped("header", TransportKind::Stdio),
        }
        self
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Short description of the target, for logs and error messages.
    pub fn target(&self) -> String {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => format!("'{command}'"),
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => {
                url.clone()
            }
        }
    }

    /// Decode a descriptor from JSON, reporting problems as [`ConfigError`].
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        let raw: RawDescriptor =
            serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Check the descriptor is well-formed for its kind.
    ///
    /// Returns the first problem found; never mutates the descriptor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ConfigError::MissingField("command"));
                }
            }
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => {
                validate_url(url)?;
            }
        }
        Ok(())
    }
}

fn warn_dropped(what: &str, kind: TransportKind) {
    tracing::warn!(kind = %kind, "dropping {what} not supported by this transport kind");
}

/// Parse and check an HTTP(S) URL.
pub fn validate_url(url: &str) -> Result<url::Url, ConfigError> {
    if url.trim().is_empty() {
        return Err(ConfigError::MissingField("url"));
    }
    let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Loose wire form; converted into the typed descriptor with field checks.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDescriptor {
    id: Option<String>,
    name: Option<String>,
    #[serde(alias = "type", alias = "transport")]
    kind: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    url: Option<String>,
    headers: Option<BTreeMap<String, String>>,
}

impl TryFrom<RawDescriptor> for ConnectionDescriptor {
    type Error = ConfigError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        let kind = raw.kind.as_deref().ok_or(ConfigError::MissingField("kind"))?;
        let kind = TransportKind::parse(kind)?;

        let transport = match kind {
            TransportKind::Stdio => {
                reject(raw.url.is_some(), "url", kind)?;
                reject(raw.headers.is_some(), "headers", kind)?;
                TransportConfig::Stdio {
                    command: raw.command.unwrap_or_default(),
                    args: raw.args.unwrap_or_default(),
                    env: raw.env.unwrap_or_default(),
                }
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                reject(raw.command.is_some(), "command", kind)?;
                reject(raw.args.is_some(), "args", kind)?;
                reject(raw.env.is_some(), "env", kind)?;
                let url = raw.url.unwrap_or_default();
                let headers = raw.headers.unwrap_or_default();
                if kind == TransportKind::Sse {
                    TransportConfig::Sse { url, headers }
                } else {
                    TransportConfig::StreamableHttp { url, headers }
                }
            }
        };

        Ok(ConnectionDescriptor {
            id: raw.id.unwrap_or_default(),
            name: raw.name.unwrap_or_default(),
            transport,
        })
    }
}

fn reject(present: bool, field: &'static str, kind: TransportKind) -> Result<(), ConfigError> {
    if present {
        Err(ConfigError::UnexpectedField {
            field,
            kind: kind.as_str(),
        })
    } else {
        Ok(())
    }
}
