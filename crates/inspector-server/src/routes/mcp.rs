//! Streamable HTTP proxy endpoint.
//!
//! - `POST /mcp` without `mcp-session-id` creates a session from the query
//!   string; with it, routes the message to that session. Requests are
//!   answered in the POST response once the backend replies.
//! - `GET /mcp` opens the session's standalone event stream.
//! - `DELETE /mcp` closes the session.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::Stream;
use inspector_proxy::transport::streamable_http::SESSION_ID_HEADER;
use inspector_proxy::{JsonRpcMessage, ProxyError, TransportKind};
use serde_json::Value;
use tracing::debug;

use crate::channel::StreamableServerTransport;
use crate::error::ServerError;
use crate::query::ConnectQuery;
use crate::state::AppState;

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn require_session(headers: &HeaderMap) -> Result<String, ServerError> {
    session_header(headers)
        .ok_or_else(|| ServerError::BadRequest(format!("missing {SESSION_ID_HEADER} header")))
}

fn lookup(
    state: &AppState,
    session_id: &str,
) -> Result<Arc<StreamableServerTransport>, ServerError> {
    state
        .channels
        .streamable(session_id)
        .ok_or_else(|| ProxyError::SessionNotFound(session_id.to_string()).into())
}

/// POST /mcp - Send a message, creating the session when needed.
#[utoipa::path(
    post,
    path = "/mcp",
    params(ConnectQuery),
    request_body(content = Object, description = "JSON-RPC message or batch"),
    responses(
        (status = 200, description = "Backend reply", body = Object),
        (status = 202, description = "Notification or response accepted"),
        (status = 400, description = "Malformed message", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse),
        (status = 429, description = "Connection limit reached", body = crate::error::ErrorResponse),
        (status = 502, description = "Backend unreachable", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn mcp_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let message =
        JsonRpcMessage::parse(&body).map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let channel = match session_header(&headers) {
        Some(id) => lookup(&state, &id)?,
        None => {
            let descriptor = query.to_descriptor(TransportKind::Stdio)?;
            state.open_streamable_session(&descriptor, &headers).await?
        }
    };
    let session_id = channel.session_id().to_string();
    let closed = || ProxyError::SessionNotFound(session_id.clone());

    let batch = message.is_batch();
    let mut waiters = Vec::new();
    for item in message.into_batch() {
        if let Some(waiter) = channel.deliver(item).map_err(|_| closed())? {
            waiters.push(waiter);
        }
    }

    let mut response = if waiters.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else {
        let mut replies = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            let reply = waiter.await.map_err(|_| {
                ProxyError::Relay(format!("session {session_id} closed before replying"))
            })?;
            replies.push(reply.into_value());
        }
        let body = if batch {
            Value::Array(replies)
        } else {
            replies.pop().unwrap_or(Value::Null)
        };
        Json(body).into_response()
    };

    let value = HeaderValue::from_str(&session_id)
        .map_err(|e| ServerError::Internal(format!("invalid session id header: {e}")))?;
    response.headers_mut().insert(SESSION_ID_HEADER, value);
    Ok(response)
}

/// GET /mcp - Open the standalone event stream.
#[utoipa::path(
    get,
    path = "/mcp",
    params(("mcp-session-id" = String, Header, description = "Session ID")),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 400, description = "Missing session header", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse),
        (status = 409, description = "Stream already open", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn mcp_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let session_id = require_session(&headers)?;
    let channel = lookup(&state, &session_id)?;
    let rx = channel.open_stream().ok_or_else(|| {
        ServerError::Conflict(format!("session {session_id} already has an open stream"))
    })?;

    debug!(session_id = %session_id, "standalone stream opened");
    let stream = StreamableServerTransport::standalone_stream(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// DELETE /mcp - Close the session.
#[utoipa::path(
    delete,
    path = "/mcp",
    params(("mcp-session-id" = String, Header, description = "Session ID")),
    responses(
        (status = 200, description = "Session closed"),
        (status = 400, description = "Missing session header", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn mcp_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ServerError> {
    let session_id = require_session(&headers)?;
    lookup(&state, &session_id)?;
    state.manager.close_connection(&session_id).await;
    Ok(StatusCode::OK)
}
