//! Preprocessor listing, cache statistics, and id-based pipeline runs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use epi::{EpiDocument, PipelineStep};

use crate::error::{ServerError, ServerResult};
use crate::negotiate::WarningCollector;
use crate::routes::focus::{respond_with_document, step_code};
use crate::routes::list_param;
use crate::state::ServerState;

/// `GET /preprocessing` — refresh discovery (single-flight) and list the
/// known preprocessor service names.
pub async fn list_preprocessors(
    State(state): State<Arc<ServerState>>,
) -> ServerResult<impl IntoResponse> {
    state
        .registry
        .refresh()
        .await
        .map_err(|e| ServerError::DiscoveryFailure(e.to_string()))?;
    Ok(Json(
        json!({ "preprocessors": state.registry.preprocessor_names() }),
    ))
}

/// `GET /preprocessing/cache/stats` — counters of the whole hierarchy.
pub async fn cache_stats(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({ "cacheStats": state.cache.stats_tree() })))
}

/// `POST /preprocessing/{epiId}` — fetch the document and run the
/// requested (or all discovered) preprocessor steps over it.
pub async fn preprocess_by_id(
    State(state): State<Arc<ServerState>>,
    Path(epi_id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let epi_value = state.fhir.fetch_epi(&epi_id).await?;
    let doc = EpiDocument::new(epi_value);
    let mut warnings = WarningCollector::default();

    if let Err(err) = state.registry.ensure_loaded().await {
        warnings.push("discovery", "DiscoveryFailure", err.to_string());
    }
    let step_names =
        list_param(&params, "preprocessors").unwrap_or_else(|| state.registry.preprocessor_names());
    let steps: Vec<PipelineStep> = step_names
        .iter()
        .map(|name| PipelineStep::parse(name))
        .collect();

    let run = state.pipeline.run(&doc, &steps).await;
    for failure in &run.failures {
        warnings.push("preprocess", step_code(failure.code), failure.step.clone());
    }

    respond_with_document(&state, EpiDocument::new(run.doc), &headers, warnings).await
}
