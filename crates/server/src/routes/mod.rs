//! HTTP endpoint implementations.
//!
//! - `health`: liveness/readiness
//! - `lenses`: lens discovery listing
//! - `preprocessing`: preprocessor listing, cache stats, id-based runs
//! - `focus`: the focus orchestration itself

pub mod focus;
pub mod health;
pub mod lenses;
pub mod preprocessing;

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::{ServerError, ServerResult};

/// Root endpoint: service info and the available routes.
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "Focusing Manager",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/focus",
            "/focus/{epiId}",
            "/preprocessing",
            "/preprocessing/{epiId}",
            "/preprocessing/cache/stats",
            "/lenses",
            "/health",
            "/ready"
        ]
    })))
}

/// Uniform 404 envelope for undefined routes.
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}

/// Collect a list-valued query parameter.
///
/// Accepts `name=a,b`, repeated `name=` keys, and the `name[]=` spelling;
/// returns `None` when the parameter never appears, so callers can fall
/// back to "all discovered".
pub(crate) fn list_param(params: &[(String, String)], name: &str) -> Option<Vec<String>> {
    let mut seen = false;
    let mut values = Vec::new();
    for (key, value) in params {
        let key = key.strip_suffix("[]").unwrap_or(key);
        if key == name {
            seen = true;
            values.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned),
            );
        }
    }
    seen.then_some(values)
}

pub(crate) fn scalar_param(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}
