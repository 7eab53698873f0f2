//! HTTP surface for the MCP inspector proxy.
//!
//! Serves the inspector UI: a REST API for managing sessions, the
//! client-facing SSE and streamable HTTP channels that carry JSON-RPC
//! between the browser and each session's backend, and health/config
//! endpoints.
//!
//! # Routes
//!
//! - `GET /health`, `GET /config`
//! - `GET /stdio`, `GET /sse`, `POST /message` (legacy SSE clients)
//! - `POST|GET|DELETE /mcp` (streamable HTTP clients)
//! - `/api/v1/connections` (session management)
//! - `/swagger-ui`, `/api-docs/openapi.json`
//!
//! # Example
//!
//! ```ignore
//! use inspector_proxy::{ProxyConfig, SessionManager};
//! use inspector_server::{Server, ServerConfig};
//!
//! let manager = SessionManager::new(ProxyConfig::default());
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:6277".parse()?);
//!
//! Server::new(manager, config).run().await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod middleware;
pub mod query;
pub mod routes;
pub mod state;

pub use channel::{SseServerTransport, StreamableServerTransport};
pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use query::{ConnectQuery, split_args};
pub use state::{AppState, ChannelRegistry};

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use inspector_proxy::SessionManager;
use inspector_proxy::transport::streamable_http::SESSION_ID_HEADER;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The inspector proxy HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server around a session manager.
    pub fn new(manager: SessionManager, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(manager, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::{get, post};

        let mut router = Router::new()
            .merge(routes::health_routes())
            .route("/config", get(routes::get_config_handler))
            // Legacy SSE clients
            .route("/stdio", get(routes::stdio_handler))
            .route("/sse", get(routes::sse_handler))
            .route("/message", post(routes::message_handler))
            // Streamable HTTP clients
            .route(
                "/mcp",
                post(routes::mcp_post_handler)
                    .get(routes::mcp_get_handler)
                    .delete(routes::mcp_delete_handler),
            )
            .nest("/api/v1", self.api_routes())
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                middleware::request_logging_middleware,
            ))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.state.config.max_body_size))
            .with_state(self.state.clone())
            .merge(routes::openapi::swagger_ui());

        if let Some(cors) = self.cors_layer() {
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// API routes (v1).
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route(
                "/connections",
                post(routes::create_connection_handler)
                    .get(routes::list_connections_handler)
                    .delete(routes::delete_all_connections_handler),
            )
            .route(
                "/connections/{id}",
                get(routes::get_connection_handler).delete(routes::delete_connection_handler),
            )
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins = &self.state.config.cors_origins;
        if origins.is_empty() {
            return None;
        }

        let layer = CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]);

        if origins.iter().any(|o| o == "*") {
            return Some(layer.allow_origin(Any));
        }

        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        Some(layer.allow_origin(parsed))
    }

    /// Run the server on the configured address.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {addr}: {e}")))?;
        self.run_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Every session is closed once shutdown begins, which ends the open
    /// event streams so in-flight connections can drain.
    pub async fn run_with_shutdown(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.router();
        let manager = self.state.manager.clone();

        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {e}")))?;
        info!(addr = %addr, "Starting server");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutting down, closing all sessions");
                manager.close_all_connections().await;
            })
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {e}")))?;

        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
