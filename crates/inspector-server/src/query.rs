//! Connection parameters carried in query strings.
//!
//! The inspector UI opens sessions with `?transportType=stdio&command=...`
//! rather than a JSON body, so the SSE and `/mcp` endpoints rebuild a
//! descriptor from these fields.

use std::collections::BTreeMap;

use inspector_proxy::{ConfigError, ConnectionDescriptor, TransportKind};
use serde::Deserialize;
use utoipa::IntoParams;

/// Query parameters that describe a backend.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ConnectQuery {
    /// `stdio`, `sse` or `streamable-http`.
    pub transport_type: Option<String>,
    /// Executable for stdio backends.
    pub command: Option<String>,
    /// Shell-style argument string for stdio backends.
    pub args: Option<String>,
    /// JSON object of environment overrides for stdio backends.
    pub env: Option<String>,
    /// URL for HTTP backends.
    pub url: Option<String>,
}

impl ConnectQuery {
    /// Build a descriptor, using `default_kind` when no transport type is given.
    pub fn to_descriptor(
        &self,
        default_kind: TransportKind,
    ) -> Result<ConnectionDescriptor, ConfigError> {
        let kind = match self.transport_type.as_deref() {
            Some(kind) if !kind.is_empty() => TransportKind::parse(kind)?,
            _ => default_kind,
        };

        match kind {
            TransportKind::Stdio => {
                if self.url.is_some() {
                    return Err(ConfigError::UnexpectedField {
                        field: "url",
                        kind: kind.as_str(),
                    });
                }
                let command = self.command.clone().unwrap_or_default();
                let name = display_name(&command, kind);
                let mut descriptor = ConnectionDescriptor::stdio(kind.as_str(), name, &command);
                for arg in split_args(self.args.as_deref().unwrap_or_default())? {
                    descriptor = descriptor.with_arg(arg);
                }
                for (key, value) in parse_env(self.env.as_deref())? {
                    descriptor = descriptor.with_env(key, value);
                }
                Ok(descriptor)
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                if self.command.is_some() {
                    return Err(ConfigError::UnexpectedField {
                        field: "command",
                        kind: kind.as_str(),
                    });
                }
                let url = self.url.clone().unwrap_or_default();
                let name = display_name(&url, kind);
                Ok(if kind == TransportKind::Sse {
                    ConnectionDescriptor::sse(kind.as_str(), name, &url)
                } else {
                    ConnectionDescriptor::streamable_http(kind.as_str(), name, &url)
                })
            }
        }
    }
}

fn display_name(target: &str, kind: TransportKind) -> String {
    if target.trim().is_empty() {
        kind.as_str().to_string()
    } else {
        target.to_string()
    }
}

fn parse_env(raw: Option<&str>) -> Result<BTreeMap<String, String>, ConfigError> {
    match raw {
        None => Ok(BTreeMap::new()),
        Some(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
        Some(text) => serde_json::from_str(text).map_err(|e| {
            ConfigError::Malformed(format!("env must be a JSON object of strings: {e}"))
        }),
    }
}

/// Split an argument string the way a POSIX shell would, without expansion.
///
/// Supports single quotes (literal), double quotes (with `\"`, `\\`, `\$`
/// and `` \` `` escapes) and backslash escapes outside quotes.
pub fn split_args(input: &str) -> Result<Vec<String>, ConfigError> {
    #[derive(Clone, Copy)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err(unterminated("double quote")),
                },
                _ => current.push(c),
            },
            Quote::None => match c {
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    let next = chars.next().ok_or_else(|| unterminated("escape"))?;
                    current.push(next);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    match quote {
        Quote::Single => return Err(unterminated("single quote")),
        Quote::Double => return Err(unterminated("double quote")),
        Quote::None => {}
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

fn unterminated(what: &str) -> ConfigError {
    ConfigError::Malformed(format!("unterminated {what} in args"))
}
