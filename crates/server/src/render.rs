//! HTML rendering through the external templating collaborator.
//!
//! The templating layer itself is out of process: when configured, the
//! final ePI is POSTed to it and the returned HTML relayed verbatim.

use serde_json::Value;

use crate::error::ServerError;

#[derive(Clone)]
pub struct HtmlRenderer {
    http: reqwest::Client,
    url: String,
}

impl HtmlRenderer {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }

    pub async fn render(&self, epi: &Value) -> Result<String, ServerError> {
        let response = self
            .http
            .post(&self.url)
            .json(epi)
            .send()
            .await
            .map_err(|e| ServerError::TemplatingFailure(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ServerError::TemplatingFailure(format!(
                "template service returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| ServerError::TemplatingFailure(e.to_string()))
    }
}
