//! JSON-RPC 2.0 message types.
//!
//! The proxy relays messages without interpreting their MCP semantics, so
//! [`JsonRpcMessage`] is a thin wrapper around a JSON value with just enough
//! accessors to tell requests from notifications and responses.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::TransportError;

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method used to forward a backend's stderr output to the client.
pub const STDERR_NOTIFICATION: &str = "notifications/stderr";

// ─────────────────────────────────────────────────────────────────────────────
// Request IDs
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON-RPC request id (number or string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Extract an id from a JSON value, ignoring null and other shapes.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }

    /// Convert back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// An opaque JSON-RPC message (single object or batch array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonRpcMessage(Value);

impl JsonRpcMessage {
    /// Wrap a JSON value. Only objects and arrays are valid messages.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        match value {
            Value::Object(_) | Value::Array(_) => Ok(Self(value)),
            other => Err(TransportError::protocol(format!(
                "expected JSON-RPC object or batch, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a message from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Parse a message from a string.
    pub fn parse_str(text: &str) -> Result<Self, TransportError> {
        Self::parse(text.as_bytes())
    }

    /// Build a request.
    pub fn request(id: RequestId, method: &str, params: Option<Value>) -> Self {
        let mut value = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id.to_value(),
            "method": method,
        });
        if let Some(params) = params {
            value["params"] = params;
        }
        Self(value)
    }

    /// Build a notification.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        let mut value = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        });
        if let Some(params) = params {
            value["params"] = params;
        }
        Self(value)
    }

    /// Build an error response for the given request id.
    pub fn error_response(id: &RequestId, error: JsonRpcError) -> Self {
        Self(json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id.to_value(),
            "error": error,
        }))
    }

    /// Split a batch into its elements; a single message yields itself.
    pub fn into_batch(self) -> Vec<JsonRpcMessage> {
        match self.0 {
            Value::Array(items) => items
                .into_iter()
                .filter(|v| v.is_object())
                .map(JsonRpcMessage)
                .collect(),
            other => vec![JsonRpcMessage(other)],
        }
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    /// The correlation id, if any.
    pub fn id(&self) -> Option<RequestId> {
        self.0.get("id").and_then(RequestId::from_value)
    }

    /// A request carries both a method and a correlation id.
    pub fn is_request(&self) -> bool {
        self.method().is_some() && self.id().is_some()
    }

    /// A notification carries a method and no id.
    pub fn is_notification(&self) -> bool {
        self.method().is_some() && self.0.get("id").is_none()
    }

    /// A response carries an id plus a result or error.
    pub fn is_response(&self) -> bool {
        self.method().is_none()
            && self.0.get("id").is_some()
            && (self.0.get("result").is_some() || self.0.get("error").is_some())
    }

    /// Whether this is a batch array.
    pub fn is_batch(&self) -> bool {
        self.0.is_array()
    }

    /// Serialize to a compact JSON string.
    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl fmt::Display for JsonRpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC error codes
impl JsonRpcError {
    /// Parse error - Invalid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Invalid Request - Not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The proxy could not deliver the request to the backend.
    pub const PROXY_FORWARD_FAILED: i64 = -32001;

    /// Create an error object.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach extra data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
