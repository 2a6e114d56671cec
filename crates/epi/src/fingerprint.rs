//! Document fingerprints and cache keys.
//!
//! The fingerprint is `SHA-256(canonical JSON of Composition.section)` —
//! canonical meaning object keys sorted and no insignificant whitespace —
//! so that two documents equal under canonicalisation share an identity.
//! When the document has no Composition the whole document is hashed
//! instead.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::document::EpiDocument;
use crate::step::{signature_prefix, PipelineStep};

/// Schema version namespacing every cache key.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

/// Render `value` as canonical JSON: sorted object keys, no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key strings go through serde_json for escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 hex fingerprint of the document's section tree.
pub fn fingerprint(doc: &EpiDocument) -> String {
    let canonical = match doc.composition().ok().and_then(|c| c.get("section")) {
        Some(sections) => canonical_json(sections),
        None => canonical_json(doc.as_value()),
    };
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Composes cache keys under one schema version.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    schema_version: String,
}

impl CacheKeys {
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// `{schemaVersion}:{fingerprint}:{sig₁|…|sig_k}`.
    pub fn key(&self, fingerprint: &str, steps: &[PipelineStep]) -> String {
        format!(
            "{}:{}:{}",
            self.schema_version,
            fingerprint,
            signature_prefix(steps)
        )
    }

    /// Literal prefix shared by every key of one fingerprint.
    pub fn fingerprint_prefix(&self, fingerprint: &str) -> String {
        format!("{}:{}:", self.schema_version, fingerprint)
    }

    /// Glob used for invalidation scans over a distributed store.
    pub fn pattern(&self, fingerprint: &str) -> String {
        format!("{}:{}:*", self.schema_version, fingerprint)
    }

    /// Glob matching every key of this schema version.
    pub fn version_pattern(&self) -> String {
        format!("{}:*", self.schema_version)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({ "b": 1, "a": { "d": [1, 2], "c": "x" } });
        assert_eq!(canonical_json(&value), r#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
    }

    fn doc_with_sections(sections: Value) -> EpiDocument {
        EpiDocument::new(json!({
            "resourceType": "Bundle",
            "entry": [{ "resource": { "resourceType": "Composition", "section": sections } }],
        }))
    }

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let a = doc_with_sections(json!([{ "title": "t", "text": { "div": "<div/>" } }]));
        let b = doc_with_sections(json!([{ "text": { "div": "<div/>" }, "title": "t" }]));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_equals_clone() {
        let a = doc_with_sections(json!([{ "title": "t" }]));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
    }

    #[test]
    fn fingerprint_changes_with_sections() {
        let a = doc_with_sections(json!([{ "title": "t" }]));
        let b = doc_with_sections(json!([{ "title": "u" }]));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn missing_composition_hashes_whole_document() {
        let bare = EpiDocument::new(json!({ "resourceType": "Bundle", "entry": [] }));
        assert_eq!(fingerprint(&bare).len(), 64);
    }

    #[test]
    fn keys_compose_version_fingerprint_and_prefix() {
        let keys = CacheKeys::new("v2");
        let steps = vec![PipelineStep::named("a"), PipelineStep::named("b")];
        assert_eq!(keys.key("f00d", &steps), "v2:f00d:a|b");
        assert_eq!(keys.key("f00d", &steps[..1]), "v2:f00d:a");
        assert_eq!(keys.pattern("f00d"), "v2:f00d:*");
        assert_eq!(keys.version_pattern(), "v2:*");
    }
}
