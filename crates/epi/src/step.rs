//! Pipeline step identity.
//!
//! A step's canonical signature is `name[:version][:configHash]`; a pipeline
//! is an ordered sequence of steps and the cache keys results by signature
//! prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl PipelineStep {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            config_hash: None,
        }
    }

    /// Parse a `name[:version][:configHash]` signature.
    pub fn parse(signature: &str) -> Self {
        let mut parts = signature.splitn(3, ':');
        let name = parts.next().unwrap_or_default().to_owned();
        let version = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        let config_hash = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
        Self {
            name,
            version,
            config_hash,
        }
    }

    pub fn signature(&self) -> String {
        let mut signature = self.name.clone();
        if let Some(version) = &self.version {
            signature.push(':');
            signature.push_str(version);
        }
        if let Some(hash) = &self.config_hash {
            signature.push(':');
            signature.push_str(hash);
        }
        signature
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// `sig₁|sig₂|…|sig_k` for a step prefix.
pub fn signature_prefix(steps: &[PipelineStep]) -> String {
    steps
        .iter()
        .map(PipelineStep::signature)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let step = PipelineStep {
            name: "annotate".into(),
            version: Some("2".into()),
            config_hash: Some("abc123".into()),
        };
        assert_eq!(step.signature(), "annotate:2:abc123");
        assert_eq!(PipelineStep::parse("annotate:2:abc123"), step);
    }

    #[test]
    fn bare_name_has_no_separators() {
        let step = PipelineStep::named("clean");
        assert_eq!(step.signature(), "clean");
        assert_eq!(PipelineStep::parse("clean"), step);
    }

    #[test]
    fn prefix_joins_with_pipe() {
        let steps = vec![PipelineStep::named("a"), PipelineStep::parse("b:1")];
        assert_eq!(signature_prefix(&steps), "a|b:1");
        assert_eq!(signature_prefix(&[]), "");
    }
}
