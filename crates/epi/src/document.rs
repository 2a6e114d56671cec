//! Typed views over an ePI bundle.
//!
//! The document stays raw JSON end to end; [`EpiDocument`] only navigates
//! and mutates the handful of paths the pipeline cares about (Composition,
//! category coding, leaflet sections, provenance extensions). Unknown keys
//! are untouched by every mutation.

use serde_json::{json, Map, Value};

use crate::error::EpiError;

/// Extension URL stamped on the Composition for every applied lens.
pub const LENSES_APPLIED_EXTENSION: &str =
    "http://hl7.eu/fhir/ig/gravitate-health/StructureDefinition/LensesApplied";

/// Code system for section codes synthesised during re-segmentation.
pub const SECTION_CODE_SYSTEM: &str = "http://hl7.org/fhir/CodeSystem/section-code";

/// Lifecycle state of an ePI, advanced monotonically `R → P → E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CategoryCode {
    /// Raw, as authored.
    Raw,
    /// At least one preprocessor has run.
    Preprocessed,
    /// At least one lens has run.
    Enhanced,
}

impl CategoryCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryCode::Raw => "R",
            CategoryCode::Preprocessed => "P",
            CategoryCode::Enhanced => "E",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "R" => Some(CategoryCode::Raw),
            "P" => Some(CategoryCode::Preprocessed),
            "E" => Some(CategoryCode::Enhanced),
            _ => None,
        }
    }
}

/// The leaflet subtree extracted from a Composition.
#[derive(Debug, Clone)]
pub struct Leaflet {
    /// Index of the Composition section the leaflet was read from.
    pub index: usize,
    /// The leaf sections carrying xhtml narrative.
    pub sections: Vec<Value>,
    /// True when no section had subsections and the first section was used
    /// as a fallback.
    pub fallback: bool,
}

/// A mutable view over one ePI bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct EpiDocument {
    value: Value,
}

impl EpiDocument {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// First bundle entry whose resource has the given `resourceType`.
    ///
    /// A bare resource (no Bundle envelope) matches itself.
    pub fn find_resource(&self, resource_type: &str) -> Option<&Value> {
        find_resource_in(&self.value, resource_type)
    }

    fn find_resource_mut(&mut self, resource_type: &str) -> Option<&mut Value> {
        if resource_type_of(&self.value) == Some(resource_type) {
            return Some(&mut self.value);
        }
        let entries = self.value.get_mut("entry")?.as_array_mut()?;
        entries
            .iter_mut()
            .filter_map(|e| e.get_mut("resource"))
            .find(|r| resource_type_of(r) == Some(resource_type))
    }

    pub fn composition(&self) -> Result<&Value, EpiError> {
        self.find_resource("Composition")
            .ok_or(EpiError::MissingComposition)
    }

    pub fn composition_mut(&mut self) -> Result<&mut Value, EpiError> {
        self.find_resource_mut("Composition")
            .ok_or(EpiError::MissingComposition)
    }

    /// Language of the narrative, from the Composition when present, else
    /// the bundle envelope.
    pub fn language(&self) -> Option<&str> {
        self.composition()
            .ok()
            .and_then(|c| c.get("language"))
            .or_else(|| self.value.get("language"))
            .and_then(Value::as_str)
    }

    /// `category[0].coding[0].code` of the Composition.
    pub fn category_code(&self) -> Option<CategoryCode> {
        let code = self
            .composition()
            .ok()?
            .get("category")?
            .get(0)?
            .get("coding")?
            .get(0)?
            .get("code")?
            .as_str()?;
        CategoryCode::parse(code)
    }

    /// Advance the category code, never moving backwards.
    ///
    /// Writing `P` over `E` is a no-op; writing over a missing or unknown
    /// category always succeeds.
    pub fn advance_category(&mut self, code: CategoryCode) -> Result<(), EpiError> {
        if let Some(current) = self.category_code() {
            if current >= code {
                return Ok(());
            }
        }
        let coding = json!({
            "system": "https://www.gravitatehealth.eu/sid/doc",
            "code": code.as_str(),
        });
        let composition = self.composition_mut()?;
        let object = composition
            .as_object_mut()
            .ok_or(EpiError::MissingComposition)?;
        let categories = object
            .entry("category")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !categories.is_array() {
            *categories = Value::Array(Vec::new());
        }
        if let Some(list) = categories.as_array_mut() {
            if list.is_empty() {
                list.push(json!({}));
            }
            if !list[0].is_object() {
                list[0] = json!({});
            }
            list[0]["coding"] = json!([coding]);
        }
        Ok(())
    }

    /// Locate the leaflet: the first Composition section that itself has
    /// subsections. Falls back to the first section when none qualifies.
    pub fn leaflet_sections(&self) -> Result<Leaflet, EpiError> {
        let sections = self
            .composition()?
            .get("section")
            .and_then(Value::as_array)
            .ok_or(EpiError::MalformedSection(0))?;

        for (index, section) in sections.iter().enumerate() {
            if let Some(subs) = section.get("section").and_then(Value::as_array) {
                if !subs.is_empty() {
                    return Ok(Leaflet {
                        index,
                        sections: subs.clone(),
                        fallback: false,
                    });
                }
            }
        }

        tracing::warn!("no composition section has subsections, using the first section");
        let subs = sections
            .first()
            .and_then(|s| s.get("section"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(Leaflet {
            index: 0,
            sections: subs,
            fallback: true,
        })
    }

    /// Write the leaflet sections back under the section at `index`.
    ///
    /// Falls back to index 0 when the index no longer exists; creates the
    /// container section when the Composition has none at all.
    pub fn write_leaflet_sections(
        &mut self,
        index: usize,
        sections: Vec<Value>,
    ) -> Result<(), EpiError> {
        let composition = self.composition_mut()?;
        let object = composition
            .as_object_mut()
            .ok_or(EpiError::MissingComposition)?;
        let container = object
            .entry("section")
            .or_insert_with(|| Value::Array(Vec::new()));
        let list = container
            .as_array_mut()
            .ok_or(EpiError::MalformedSection(index))?;
        if list.is_empty() {
            list.push(json!({}));
        }
        let slot = if index < list.len() { index } else { 0 };
        if !list[slot].is_object() {
            list[slot] = json!({});
        }
        list[slot]["section"] = Value::Array(sections);
        Ok(())
    }

    /// Append a `LensesApplied` provenance extension to the Composition.
    ///
    /// Entries are never deduplicated or reordered; two applications of the
    /// same lens produce two entries in application order.
    pub fn append_lens_provenance(
        &mut self,
        lens_id: &str,
        explanation: &str,
    ) -> Result<(), EpiError> {
        let entry = json!({
            "url": LENSES_APPLIED_EXTENSION,
            "extension": [
                { "url": "lens", "valueReference": { "reference": format!("Library/{lens_id}") } },
                { "url": "elementClass", "valueString": lens_id },
                { "url": "explanation", "valueString": explanation },
            ],
        });
        let composition = self.composition_mut()?;
        let object = composition
            .as_object_mut()
            .ok_or(EpiError::MissingComposition)?;
        let extensions = object
            .entry("extension")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !extensions.is_array() {
            *extensions = Value::Array(Vec::new());
        }
        if let Some(list) = extensions.as_array_mut() {
            list.push(entry);
        }
        Ok(())
    }

    /// Lens ids recorded in `LensesApplied` extensions, in append order.
    pub fn applied_lenses(&self) -> Vec<String> {
        let Ok(composition) = self.composition() else {
            return Vec::new();
        };
        composition
            .get("extension")
            .and_then(Value::as_array)
            .map(|extensions| {
                extensions
                    .iter()
                    .filter(|e| e.get("url").and_then(Value::as_str) == Some(LENSES_APPLIED_EXTENSION))
                    .filter_map(lens_id_of_extension)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lens_id_of_extension(extension: &Value) -> Option<String> {
    extension
        .get("extension")?
        .as_array()?
        .iter()
        .find(|sub| sub.get("url").and_then(Value::as_str) == Some("elementClass"))?
        .get("valueString")?
        .as_str()
        .map(str::to_owned)
}

fn resource_type_of(value: &Value) -> Option<&str> {
    value.get("resourceType").and_then(Value::as_str)
}

fn find_resource_in<'a>(value: &'a Value, resource_type: &str) -> Option<&'a Value> {
    if resource_type_of(value) == Some(resource_type) {
        return Some(value);
    }
    value
        .get("entry")?
        .as_array()?
        .iter()
        .filter_map(|e| e.get("resource"))
        .find(|r| resource_type_of(r) == Some(resource_type))
}

/// Build a synthetic section code for section number `n` (1-based).
pub fn default_section_code(n: usize) -> Value {
    json!({
        "coding": [{
            "system": SECTION_CODE_SYSTEM,
            "code": format!("section{n}"),
        }],
    })
}

/// Build an empty section object carrying only a synthesised title/code.
pub fn default_section(n: usize) -> Value {
    let mut section = Map::new();
    section.insert("title".into(), Value::String(format!("Section {n}")));
    section.insert("code".into(), default_section_code(n));
    Value::Object(section)
}
