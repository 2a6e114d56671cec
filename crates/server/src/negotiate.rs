//! Content negotiation and the per-request warning collector.
//!
//! Sub-stage failures never cross stage boundaries as errors; they are
//! collected here and surfaced in one response header. The `Accept`
//! header picks JSON or HTML; anything unrecognised gets JSON.

use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

/// Response header carrying the JSON-encoded warning list.
/// (Header names are case-insensitive; this renders as
/// `GH-Focusing-Warnings` in docs and clients.)
pub const WARNINGS_HEADER: &str = "gh-focusing-warnings";

/// True when the client prefers an HTML rendition.
pub fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false)
}

/// One non-fatal stage failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub stage: String,
    pub code: String,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct WarningCollector {
    entries: Vec<Warning>,
}

impl WarningCollector {
    pub fn push(&mut self, stage: &str, code: &str, detail: impl Into<String>) {
        self.entries.push(Warning {
            stage: stage.to_owned(),
            code: code.to_owned(),
            detail: detail.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Warning] {
        &self.entries
    }

    /// Header value for [`WARNINGS_HEADER`], `None` when no stage warned.
    /// Non-ASCII text is `\u`-escaped so the value stays a legal header.
    pub fn header_value(&self) -> Option<HeaderValue> {
        if self.entries.is_empty() {
            return None;
        }
        let json = serde_json::to_string(&self.entries).ok()?;
        HeaderValue::from_str(&escape_non_ascii(&json)).ok()
    }
}

fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_the_default_for_unknown_accept_types() {
        let mut headers = HeaderMap::new();
        assert!(!wants_html(&headers));
        headers.insert(ACCEPT, HeaderValue::from_static("application/xml"));
        assert!(!wants_html(&headers));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/json"));
        assert!(wants_html(&headers));
    }

    #[test]
    fn empty_collector_yields_no_header() {
        assert!(WarningCollector::default().header_value().is_none());
    }

    #[test]
    fn header_value_is_json_encoded() {
        let mut warnings = WarningCollector::default();
        warnings.push("preprocess", "UpstreamUnavailable", "annotator");
        let value = warnings.header_value().unwrap();
        let parsed: Vec<Warning> = serde_json::from_str(value.to_str().unwrap()).unwrap();
        assert_eq!(parsed, warnings.entries());
    }

    #[test]
    fn non_ascii_details_stay_header_safe() {
        let mut warnings = WarningCollector::default();
        warnings.push("lens", "RuntimeFailure", "prospecto no válido — error");
        let value = warnings.header_value().unwrap();
        assert!(value.to_str().is_ok());
        let parsed: Vec<Warning> = serde_json::from_str(value.to_str().unwrap()).unwrap();
        assert!(parsed[0].detail.contains("válido"));
    }
}
