//! Session-scoped MCP proxy core.
//!
//! This crate pairs a client-facing channel (typically a browser talking
//! through the inspector's HTTP surface) with a backend channel to an MCP
//! server, and relays opaque JSON-RPC messages between them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  SessionManager                                             │
//! │  - Admission (max concurrent sessions)                      │
//! │  - Registry of sessions + ConnectionStatus                  │
//! │  - Observer notifications                                   │
//! └─────────────────────────────────────────────────────────────┘
//!          │ connect                         │ attach_client
//!          ▼                                 ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  TransportFactory        │   │  relay::wire                 │
//! │  - descriptor → channel  │   │  - client ⇄ server messages  │
//! │  - env / header layering │   │  - close propagation         │
//! │  - start deadline        │   │  - synthetic error replies   │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Transport (stdio | sse | streamable-http | memory)         │
//! │  - start / send / close, events via EventHub                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use inspector_proxy::{ConnectionDescriptor, ProxyConfig, SessionManager};
//! use reqwest::header::HeaderMap;
//!
//! let manager = SessionManager::new(ProxyConfig::default());
//! let descriptor = ConnectionDescriptor::stdio("everything", "Everything", "npx")
//!     .with_arg("-y")
//!     .with_arg("@modelcontextprotocol/server-everything");
//!
//! let session_id = manager.create_connection(&descriptor, &HeaderMap::new()).await?;
//! println!("{:?}", manager.status(&session_id));
//! manager.close_connection(&session_id).await;
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod manager;
pub mod protocol;
pub mod relay;
pub mod status;
pub mod transport;

// Re-export main types
pub use config::ProxyConfig;
pub use descriptor::{ConnectionDescriptor, TransportConfig, TransportKind, validate_url};
pub use error::{ConfigError, ProxyError, Result, TransportError};
pub use factory::{Connector, PASSTHROUGH_HEADERS, TransportFactory, passthrough_headers};
pub use manager::{SessionEvent, SessionManager, SessionObserver};
pub use protocol::{JsonRpcError, JsonRpcMessage, RequestId};
pub use relay::{ErrorSink, RelayHandle, Side, TracingErrorSink, wire};
pub use status::{ConnectionState, ConnectionStatus};
pub use transport::{
    EventHub, EventStream, MemoryTransport, SharedTransport, Transport, TransportEvent,
};
