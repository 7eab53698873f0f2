//! Legacy SSE proxy endpoints.
//!
//! `GET /stdio` and `GET /sse` create a backend session and hold an SSE
//! stream open for the browser; the browser POSTs its messages to
//! `/message?sessionId=...`.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use inspector_proxy::{JsonRpcMessage, TransportKind};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::ServerError;
use crate::query::ConnectQuery;
use crate::state::AppState;

/// Query for `POST /message`.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct MessageQuery {
    /// Session the message belongs to.
    pub session_id: String,
}

/// GET /stdio - Spawn a stdio backend and stream its messages.
#[utoipa::path(
    get,
    path = "/stdio",
    params(ConnectQuery),
    responses(
        (status = 200, description = "Event stream; first event is `endpoint`", content_type = "text/event-stream"),
        (status = 400, description = "Invalid parameters", body = crate::error::ErrorResponse),
        (status = 429, description = "Connection limit reached", body = crate::error::ErrorResponse),
        (status = 502, description = "Backend failed to start", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn stdio_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    open_stream(state, headers, query, TransportKind::Stdio).await
}

/// GET /sse - Connect to an HTTP backend and stream its messages.
#[utoipa::path(
    get,
    path = "/sse",
    params(ConnectQuery),
    responses(
        (status = 200, description = "Event stream; first event is `endpoint`", content_type = "text/event-stream"),
        (status = 400, description = "Invalid parameters", body = crate::error::ErrorResponse),
        (status = 429, description = "Connection limit reached", body = crate::error::ErrorResponse),
        (status = 502, description = "Backend unreachable", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn sse_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    open_stream(state, headers, query, TransportKind::Sse).await
}

async fn open_stream(
    state: AppState,
    headers: HeaderMap,
    query: ConnectQuery,
    default_kind: TransportKind,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let descriptor = query.to_descriptor(default_kind)?;
    let (channel, outbound) = state.open_sse_session(&descriptor, &headers).await?;
    Ok(Sse::new(channel.into_stream(outbound)).keep_alive(KeepAlive::default()))
}

/// POST /message - Deliver a browser message to its session.
#[utoipa::path(
    post,
    path = "/message",
    params(MessageQuery),
    request_body(content = Object, description = "JSON-RPC message or batch"),
    responses(
        (status = 202, description = "Message accepted"),
        (status = 400, description = "Malformed message", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorResponse),
    ),
    tag = "proxy"
)]
pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let not_found = || ServerError::NotFound(format!("session '{}'", query.session_id));

    let channel = state.channels.sse(&query.session_id).ok_or_else(not_found)?;
    let message =
        JsonRpcMessage::parse(&body).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    channel.deliver(message).map_err(|_| not_found())?;
    Ok(StatusCode::ACCEPTED)
}
