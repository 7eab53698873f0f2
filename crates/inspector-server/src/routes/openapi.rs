//! OpenAPI documentation configuration.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::{config, connections, health, mcp, sse};

/// OpenAPI documentation for the inspector proxy.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "MCP Inspector Proxy API",
        description = "Session-scoped proxy between the inspector UI and MCP servers",
        version = "1.0.0",
        license(name = "MIT"),
    ),
    servers(
        (url = "/", description = "Local server"),
    ),
    paths(
        // Health
        health::health,
        // Config
        config::get_config_handler,
        // Connections
        connections::create_connection_handler,
        connections::list_connections_handler,
        connections::get_connection_handler,
        connections::delete_connection_handler,
        connections::delete_all_connections_handler,
        // Proxy
        sse::stdio_handler,
        sse::sse_handler,
        sse::message_handler,
        mcp::mcp_post_handler,
        mcp::mcp_get_handler,
        mcp::mcp_delete_handler,
    ),
    components(
        schemas(
            health::HealthResponse,
            config::ConfigResponse,
            connections::CreateConnectionResponse,
            connections::ListConnectionsResponse,
            connections::CloseConnectionResponse,
            connections::CloseAllResponse,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "config", description = "Connection defaults"),
        (name = "connections", description = "Session management"),
        (name = "proxy", description = "Client-facing proxy channels"),
    )
)]
pub struct ApiDoc;

/// Create the Swagger UI router.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
