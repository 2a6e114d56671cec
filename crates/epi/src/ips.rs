//! Read-only view over a patient summary (IPS) bundle.
//!
//! The summary is opaque to the pipeline except for the patient identifier
//! and the condition/allergy display strings the explanation builder needs.

use serde_json::Value;

/// One allergy, reduced to the fields the explanation templates use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllergyEntry {
    pub kind: String,
    pub causal_agent: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpsDocument {
    value: Value,
}

impl IpsDocument {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    fn resources<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.value
            .get("entry")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|e| e.get("resource"))
            .filter(move |r| r.get("resourceType").and_then(Value::as_str) == Some(resource_type))
    }

    /// The Patient's first identifier value, falling back to its logical id.
    pub fn patient_identifier(&self) -> Option<String> {
        let patient = self.resources("Patient").next()?;
        patient
            .get("identifier")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(|id| id.get("value"))
            .or_else(|| patient.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Display strings of every Condition in the summary.
    pub fn condition_displays(&self) -> Vec<String> {
        self.resources("Condition")
            .filter_map(code_display)
            .collect()
    }

    /// `{type, causal agent}` pairs of every AllergyIntolerance.
    pub fn allergies(&self) -> Vec<AllergyEntry> {
        self.resources("AllergyIntolerance")
            .filter_map(|resource| {
                let causal_agent = code_display(resource)?;
                let kind = resource
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("allergy")
                    .to_owned();
                Some(AllergyEntry { kind, causal_agent })
            })
            .collect()
    }
}

/// `code.coding[0].display`, falling back to `code.text`.
fn code_display(resource: &Value) -> Option<String> {
    let code = resource.get("code")?;
    code.get("coding")
        .and_then(Value::as_array)
        .and_then(|codings| codings.first())
        .and_then(|coding| coding.get("display"))
        .or_else(|| code.get("text"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_ips() -> IpsDocument {
        IpsDocument::new(json!({
            "resourceType": "Bundle",
            "entry": [
                { "resource": { "resourceType": "Patient", "id": "p1",
                    "identifier": [{ "value": "pat-7" }] } },
                { "resource": { "resourceType": "Condition",
                    "code": { "coding": [{ "display": "Asthma" }] } } },
                { "resource": { "resourceType": "Condition",
                    "code": { "text": "Hay fever" } } },
                { "resource": { "resourceType": "AllergyIntolerance", "type": "allergy",
                    "code": { "coding": [{ "display": "Penicillin" }] } } },
            ],
        }))
    }

    #[test]
    fn patient_identifier_prefers_identifier_value() {
        assert_eq!(sample_ips().patient_identifier(), Some("pat-7".into()));
    }

    #[test]
    fn conditions_fall_back_to_code_text() {
        assert_eq!(sample_ips().condition_displays(), vec!["Asthma", "Hay fever"]);
    }

    #[test]
    fn allergies_carry_type_and_agent() {
        let allergies = sample_ips().allergies();
        assert_eq!(
            allergies,
            vec![AllergyEntry { kind: "allergy".into(), causal_agent: "Penicillin".into() }]
        );
    }
}
