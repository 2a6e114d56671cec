//! The focus orchestration: resolve inputs, preprocess, apply lenses,
//! negotiate the response.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use epi::{CategoryCode, EpiDocument, IpsDocument, PipelineStep};
use focusman::StepFailureCode;
use lens::LensScript;
use registry::RegistryError;

use crate::error::{ServerError, ServerResult};
use crate::negotiate::{wants_html, WarningCollector, WARNINGS_HEADER};
use crate::routes::{list_param, scalar_param};
use crate::state::ServerState;

/// Inline request body; every slot may instead arrive by identifier.
#[derive(Debug, Default, Deserialize)]
pub struct FocusBody {
    #[serde(default)]
    pub epi: Option<Value>,
    #[serde(default)]
    pub ips: Option<Value>,
    #[serde(default)]
    pub pv: Option<Value>,
}

fn parse_body(bytes: &Bytes) -> ServerResult<FocusBody> {
    if bytes.is_empty() {
        return Ok(FocusBody::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|e| ServerError::RequestMalformed(format!("invalid JSON body: {e}")))
}

/// `POST /focus` — all inputs inline or via query identifiers.
pub async fn focus_inline(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    let request_id = request_id_of(&headers);
    run_focus(state, None, params, headers, request_id, body).await
}

/// `POST /focus/{epiId}` — the ePI fetched from the FHIR upstream.
pub async fn focus_by_id(
    State(state): State<Arc<ServerState>>,
    Path(epi_id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    let request_id = request_id_of(&headers);
    run_focus(state, Some(epi_id), params, headers, request_id, body).await
}

fn request_id_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn run_focus(
    state: Arc<ServerState>,
    epi_id: Option<String>,
    params: Vec<(String, String)>,
    headers: HeaderMap,
    request_id: Option<String>,
    body: Bytes,
) -> ServerResult<Response> {
    let body = parse_body(&body)?;
    let mut warnings = WarningCollector::default();

    // Input sources: path/query identifiers win over inline payloads;
    // a required slot with neither is a 400.
    let epi_value = match (epi_id, body.epi) {
        (Some(id), _) => state.fhir.fetch_epi(&id).await?,
        (None, Some(inline)) => inline,
        (None, None) => {
            return Err(ServerError::RequestMalformed(
                "an ePI must be supplied inline or by id".into(),
            ))
        }
    };
    let mut doc = EpiDocument::new(epi_value);

    let ips_value = match (scalar_param(&params, "patientIdentifier"), body.ips) {
        (Some(pid), _) => state.fhir.fetch_ips(&pid).await?,
        (None, Some(inline)) => inline,
        (None, None) => {
            return Err(ServerError::RequestMalformed(
                "a patient summary must be supplied inline or via patientIdentifier".into(),
            ))
        }
    };
    let ips = IpsDocument::new(ips_value);

    // The persona vector is optional; a failed fetch degrades to "none".
    let pv = match scalar_param(&params, "pvId") {
        Some(pv_id) => match state.fhir.fetch_pv(&pv_id).await {
            Ok(pv) => Some(pv),
            Err(err) => {
                warnings.push("profile", "UpstreamUnavailable", err.to_string());
                None
            }
        },
        None => body.pv,
    };

    // One discovery attempt; failure means "no services available".
    if let Err(err) = state.registry.ensure_loaded().await {
        warnings.push("discovery", "DiscoveryFailure", err.to_string());
    }
    let preprocessors =
        list_param(&params, "preprocessors").unwrap_or_else(|| state.registry.preprocessor_names());
    let lens_keys = list_param(&params, "lenses").unwrap_or_else(|| state.registry.lens_keys());

    // Preprocessing is skipped entirely once the document left the raw state.
    let already_processed = matches!(
        doc.category_code(),
        Some(CategoryCode::Preprocessed | CategoryCode::Enhanced)
    );
    if !already_processed && !preprocessors.is_empty() {
        let steps: Vec<PipelineStep> = preprocessors
            .iter()
            .map(|name| PipelineStep::parse(name))
            .collect();
        let run = state.pipeline.run(&doc, &steps).await;
        for failure in &run.failures {
            warnings.push("preprocess", step_code(failure.code), failure.step.clone());
        }
        doc = EpiDocument::new(run.doc);
    }

    // Lenses run strictly in caller order; each sees the previous output.
    for key in &lens_keys {
        match state.registry.fetch_lens(key).await {
            Ok(payload) => {
                match LensScript::from_base64(
                    payload.key.as_str(),
                    payload.data_b64.as_deref(),
                    payload.metadata,
                ) {
                    Ok(script) => {
                        let (next, outcome) = state
                            .lenses
                            .clone()
                            .apply_async(doc, script, ips.clone(), pv.clone(), request_id.clone())
                            .await;
                        doc = next;
                        if let Err(err) = outcome {
                            warnings.push("lens", err.kind(), key.clone());
                        }
                    }
                    Err(err) => warnings.push("lens", err.kind(), key.clone()),
                }
            }
            Err(err) => warnings.push("lens", registry_code(&err), key.clone()),
        }
    }

    respond_with_document(&state, doc, &headers, warnings).await
}

/// JSON unless the client accepts HTML *and* a template collaborator is
/// configured; warnings ride along as a header either way.
pub(crate) async fn respond_with_document(
    state: &ServerState,
    doc: EpiDocument,
    headers: &HeaderMap,
    warnings: WarningCollector,
) -> ServerResult<Response> {
    let mut response = match (&state.renderer, wants_html(headers)) {
        (Some(renderer), true) => {
            let html = renderer.render(doc.as_value()).await?;
            Html(html).into_response()
        }
        _ => Json(doc.into_value()).into_response(),
    };
    if let Some(value) = warnings.header_value() {
        response.headers_mut().insert(WARNINGS_HEADER, value);
    }
    Ok(response)
}

pub(crate) fn step_code(code: StepFailureCode) -> &'static str {
    match code {
        StepFailureCode::UnknownService => "UnknownService",
        StepFailureCode::UpstreamUnavailable => "UpstreamUnavailable",
        StepFailureCode::DiscoveryFailure => "DiscoveryFailure",
    }
}

fn registry_code(err: &RegistryError) -> &'static str {
    match err {
        RegistryError::UnknownService(_) | RegistryError::UnknownLens(_) => "UnknownService",
        RegistryError::Discovery(_) => "DiscoveryFailure",
        RegistryError::Upstream { .. } => "UpstreamUnavailable",
    }
}
