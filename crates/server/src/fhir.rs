//! Clients for the upstream FHIR collaborators.
//!
//! Documents, patient summaries, and persona vectors are fetched by
//! identifier. A 404 is typed separately so the orchestrator can
//! propagate it; any other failure carries the upstream error envelope
//! when one was sent.

use serde_json::{json, Value};
use thiserror::Error;

use focusman::FocusConfig;

#[derive(Debug, Error)]
pub enum FhirError {
    #[error("`{0}` not found upstream")]
    NotFound(String),

    #[error("upstream request failed: {detail}")]
    Upstream {
        detail: String,
        envelope: Option<Value>,
    },
}

#[derive(Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    epi_base: String,
    ips_base: String,
    profile_base: String,
}

impl FhirClient {
    pub fn new(http: reqwest::Client, config: &FocusConfig) -> Self {
        Self {
            http,
            epi_base: config.fhir_epi_url.trim_end_matches('/').to_owned(),
            ips_base: config.fhir_ips_url.trim_end_matches('/').to_owned(),
            profile_base: config.profile_url.trim_end_matches('/').to_owned(),
        }
    }

    /// `GET {fhirEpiUrl}/Bundle/{id}`.
    pub async fn fetch_epi(&self, id: &str) -> Result<Value, FhirError> {
        self.get_json(&format!("{}/Bundle/{id}", self.epi_base), id)
            .await
    }

    /// Resolve a patient summary, trying the three upstream shapes in
    /// order: `$summary` by id, identifier search, `Parameters` POST.
    pub async fn fetch_ips(&self, patient_identifier: &str) -> Result<Value, FhirError> {
        let by_id = format!("{}/Patient/{patient_identifier}/$summary", self.ips_base);
        match self.get_json(&by_id, patient_identifier).await {
            Ok(summary) => return Ok(summary),
            Err(FhirError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let by_identifier = format!(
            "{}/Patient/$summary?identifier={patient_identifier}",
            self.ips_base
        );
        match self.get_json(&by_identifier, patient_identifier).await {
            Ok(summary) => return Ok(summary),
            Err(FhirError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let parameters = json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "identifier",
                "valueIdentifier": { "value": patient_identifier },
            }],
        });
        let response = self
            .http
            .post(format!("{}/Patient/$summary", self.ips_base))
            .json(&parameters)
            .send()
            .await
            .map_err(|e| FhirError::Upstream {
                detail: e.to_string(),
                envelope: None,
            })?;
        Self::into_json(response, patient_identifier).await
    }

    /// `GET {profileUrl}/{id}`.
    pub async fn fetch_pv(&self, id: &str) -> Result<Value, FhirError> {
        self.get_json(&format!("{}/{id}", self.profile_base), id)
            .await
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<Value, FhirError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FhirError::Upstream {
                detail: e.to_string(),
                envelope: None,
            })?;
        Self::into_json(response, what).await
    }

    async fn into_json(response: reqwest::Response, what: &str) -> Result<Value, FhirError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FhirError::NotFound(what.to_owned()));
        }
        if !status.is_success() {
            let envelope = response.json::<Value>().await.ok();
            return Err(FhirError::Upstream {
                detail: format!("upstream returned {status}"),
                envelope,
            });
        }
        response.json().await.map_err(|e| FhirError::Upstream {
            detail: format!("invalid upstream body: {e}"),
            envelope: None,
        })
    }
}
