use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::fhir::FhirError;

pub type ServerResult<T> = Result<T, ServerError>;

/// Orchestrator-level errors: the only ones that decide an HTTP status.
/// Stage failures inside a focus flow never surface here — they go to the
/// warning collector.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    RequestMalformed(String),

    #[error("upstream resource not found: {0}")]
    UpstreamNotFound(String),

    #[error("upstream unavailable: {detail}")]
    UpstreamUnavailable {
        detail: String,
        /// Error envelope relayed from the upstream, when it sent one.
        envelope: Option<Value>,
    },

    #[error("service discovery failed: {0}")]
    DiscoveryFailure(String),

    #[error("template rendering failed: {0}")]
    TemplatingFailure(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("not found")]
    NotFound,
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::RequestMalformed(_) => StatusCode::BAD_REQUEST,
            ServerError::UpstreamNotFound(_) | ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ServerError::DiscoveryFailure(_)
            | ServerError::TemplatingFailure(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServerError::RequestMalformed(_) => "REQUEST_MALFORMED",
            ServerError::UpstreamNotFound(_) => "UPSTREAM_NOT_FOUND",
            ServerError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            ServerError::DiscoveryFailure(_) => "DISCOVERY_FAILURE",
            ServerError::TemplatingFailure(_) => "TEMPLATING_FAILURE",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if let ServerError::UpstreamUnavailable {
            envelope: Some(envelope),
            ..
        } = &self
        {
            error["upstream"] = envelope.clone();
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<FhirError> for ServerError {
    fn from(err: FhirError) -> Self {
        match err {
            FhirError::NotFound(what) => ServerError::UpstreamNotFound(what),
            FhirError::Upstream { detail, envelope } => {
                ServerError::UpstreamUnavailable { detail, envelope }
            }
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
