use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

/// `GET /lenses` — refresh discovery (single-flight) and list every
/// resolvable lens key.
pub async fn list_lenses(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    state
        .registry
        .refresh()
        .await
        .map_err(|e| ServerError::DiscoveryFailure(e.to_string()))?;
    Ok(Json(json!({ "lenses": state.registry.lens_keys() })))
}
