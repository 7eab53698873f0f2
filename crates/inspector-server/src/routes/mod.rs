//! HTTP routes.

pub mod config;
pub mod connections;
pub mod health;
pub mod mcp;
pub mod openapi;
pub mod sse;

pub use config::{ConfigResponse, get_config_handler};
pub use connections::{
    CloseAllResponse, CloseConnectionResponse, CreateConnectionResponse,
    ListConnectionsResponse, create_connection_handler, delete_all_connections_handler,
    delete_connection_handler, get_connection_handler, list_connections_handler,
};
pub use health::{HealthResponse, health_routes};
pub use mcp::{mcp_delete_handler, mcp_get_handler, mcp_post_handler};
pub use sse::{message_handler, sse_handler, stdio_handler};
