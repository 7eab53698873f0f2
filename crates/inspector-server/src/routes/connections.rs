//! Session management endpoints.
//!
//! - `POST /api/v1/connections` - Create a session from a descriptor
//! - `GET /api/v1/connections` - List sessions
//! - `GET /api/v1/connections/{id}` - Session status
//! - `DELETE /api/v1/connections/{id}` - Close a session
//! - `DELETE /api/v1/connections` - Close every session

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use inspector_proxy::{ConnectionDescriptor, ConnectionStatus, ProxyError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ServerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response after creating a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConnectionResponse {
    /// Id of the new session.
    pub session_id: String,
    /// Initial status.
    #[schema(value_type = Object)]
    pub status: ConnectionStatus,
}

/// Response for listing sessions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListConnectionsResponse {
    #[schema(value_type = Vec<Object>)]
    pub connections: Vec<ConnectionStatus>,
    pub total: usize,
}

/// Response after closing a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CloseConnectionResponse {
    pub session_id: String,
    /// Whether the session existed.
    pub closed: bool,
}

/// Response after closing every session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CloseAllResponse {
    /// Number of sessions that were open.
    pub closed: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/connections - Create a session.
///
/// Allow-listed request headers (authorization, mcp-session-id, ...) are
/// forwarded to HTTP backends.
#[utoipa::path(
    post,
    path = "/api/v1/connections",
    request_body(content = Object, description = "Connection descriptor"),
    responses(
        (status = 201, description = "Session created", body = CreateConnectionResponse),
        (status = 400, description = "Invalid descriptor", body = crate::error::ErrorResponse),
        (status = 429, description = "Connection limit reached", body = crate::error::ErrorResponse),
        (status = 502, description = "Backend unreachable", body = crate::error::ErrorResponse),
    ),
    tag = "connections"
)]
pub async fn create_connection_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CreateConnectionResponse>), ServerError> {
    let descriptor = ConnectionDescriptor::from_json(body)?;
    let session_id = state.manager.create_connection(&descriptor, &headers).await?;

    let status = state
        .manager
        .status(&session_id)
        .ok_or_else(|| ProxyError::Cancelled(session_id.clone()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConnectionResponse { session_id, status }),
    ))
}

/// GET /api/v1/connections - List sessions.
#[utoipa::path(
    get,
    path = "/api/v1/connections",
    responses(
        (status = 200, description = "Session list", body = ListConnectionsResponse),
    ),
    tag = "connections"
)]
pub async fn list_connections_handler(
    State(state): State<AppState>,
) -> Json<ListConnectionsResponse> {
    let connections = state.manager.statuses();
    let total = connections.len();
    Json(ListConnectionsResponse { connections, total })
}

/// GET /api/v1/connections/{id} - Session status.
#[utoipa::path(
    get,
    path = "/api/v1/connections/{id}",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session status", body = Object),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse),
    ),
    tag = "connections"
)]
pub async fn get_connection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionStatus>, ServerError> {
    state
        .manager
        .status(&id)
        .map(Json)
        .ok_or_else(|| ProxyError::SessionNotFound(id).into())
}

/// DELETE /api/v1/connections/{id} - Close a session. Idempotent.
#[utoipa::path(
    delete,
    path = "/api/v1/connections/{id}",
    params(("id" = String, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session closed", body = CloseConnectionResponse),
    ),
    tag = "connections"
)]
pub async fn delete_connection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<CloseConnectionResponse> {
    let existed = state.manager.status(&id).is_some();
    state.manager.close_connection(&id).await;
    if existed {
        info!(session_id = %id, "session closed via api");
    }
    Json(CloseConnectionResponse {
        session_id: id,
        closed: existed,
    })
}

/// DELETE /api/v1/connections - Close every session.
#[utoipa::path(
    delete,
    path = "/api/v1/connections",
    responses(
        (status = 200, description = "All sessions closed", body = CloseAllResponse),
    ),
    tag = "connections"
)]
pub async fn delete_all_connections_handler(
    State(state): State<AppState>,
) -> Json<CloseAllResponse> {
    let closed = state.manager.session_count();
    state.manager.close_all_connections().await;
    Json(CloseAllResponse { closed })
}
