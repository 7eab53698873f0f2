//! Configuration endpoint.
//!
//! Serves the connection values the UI pre-fills in its connect form.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

/// Default connection values.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfigResponse {
    /// Command for stdio backends.
    pub default_command: Option<String>,
    /// Arguments for stdio backends.
    pub default_args: Vec<String>,
    /// Environment overrides for stdio backends.
    pub default_env: BTreeMap<String, String>,
    /// Preferred transport kind.
    pub default_transport: Option<String>,
    /// URL for HTTP backends.
    pub default_server_url: Option<String>,
    /// Maximum number of concurrent sessions.
    pub max_connections: usize,
}

/// GET /config - Connection defaults.
#[utoipa::path(
    get,
    path = "/config",
    responses(
        (status = 200, description = "Connection defaults", body = ConfigResponse),
    ),
    tag = "config"
)]
pub async fn get_config_handler(State(state): State<AppState>) -> Json<ConfigResponse> {
    let defaults = &state.config.defaults;
    Json(ConfigResponse {
        default_command: defaults.command.clone(),
        default_args: defaults.args.clone(),
        default_env: defaults.env.clone(),
        default_transport: defaults.transport.map(|k| k.as_str().to_string()),
        default_server_url: defaults.server_url.clone(),
        max_connections: state.manager.config().max_connections,
    })
}
