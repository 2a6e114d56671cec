//! Default lens explanations.
//!
//! When a lens carries no `explanation` function the response still tells
//! the patient why their leaflet changed. The templates form a closed
//! table keyed by lens identifier and language; parameterised ones are
//! filled from the patient summary.

use epi::IpsDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LensKind {
    Pregnancy,
    Conditions,
    Allergies,
    Interaction,
    Default,
}

fn lens_kind(lens_id: &str) -> LensKind {
    let id = lens_id.to_ascii_lowercase();
    if id.contains("pregnan") {
        LensKind::Pregnancy
    } else if id.contains("condition") {
        LensKind::Conditions
    } else if id.contains("allerg") {
        LensKind::Allergies
    } else if id.contains("interact") {
        LensKind::Interaction
    } else {
        LensKind::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    En,
    Es,
    Pt,
    Da,
}

fn language(tag: &str) -> Language {
    match tag.get(..2).map(str::to_ascii_lowercase).as_deref() {
        Some("es") => Language::Es,
        Some("pt") => Language::Pt,
        Some("da") => Language::Da,
        _ => Language::En,
    }
}

/// `[prefix, glue, defaultNoun, defaultFiller]` of a parameterised template.
struct Fragments {
    prefix: &'static str,
    glue: &'static str,
    noun: &'static str,
    filler: &'static str,
}

impl Fragments {
    fn fill(&self, items: Vec<String>) -> String {
        if items.is_empty() {
            format!("{} {} {}.", self.prefix, self.noun, self.filler)
        } else {
            format!("{} {}.", self.prefix, items.join(self.glue))
        }
    }
}

/// Localized explanation for `(lens, language)`, filled from the IPS.
///
/// Unknown lens identifiers use the default template; unknown languages
/// fall back to English. IPS lookups that yield nothing fall back to the
/// template's default noun/filler fragments.
pub fn default_explanation(lens_id: &str, language_tag: &str, ips: &IpsDocument) -> String {
    let lang = language(language_tag);
    match lens_kind(lens_id) {
        LensKind::Pregnancy => pregnancy_text(lang).to_owned(),
        LensKind::Interaction => interaction_text(lang).to_owned(),
        LensKind::Conditions => condition_fragments(lang).fill(ips.condition_displays()),
        LensKind::Allergies => {
            let items = ips
                .allergies()
                .into_iter()
                .map(|a| format!("{} ({})", a.causal_agent, a.kind))
                .collect();
            allergy_fragments(lang).fill(items)
        }
        LensKind::Default => default_text(lang).to_owned(),
    }
}

fn pregnancy_text(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Some sections are highlighted because this medicine needs special attention during pregnancy."
        }
        Language::Es => {
            "Se han resaltado secciones porque este medicamento requiere atención especial durante el embarazo."
        }
        Language::Pt => {
            "Algumas secções foram realçadas porque este medicamento exige atenção especial durante a gravidez."
        }
        Language::Da => {
            "Nogle afsnit er fremhævet, fordi dette lægemiddel kræver særlig opmærksomhed under graviditet."
        }
    }
}

fn interaction_text(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "Some sections are highlighted because of possible interactions with your current medications."
        }
        Language::Es => {
            "Se han resaltado secciones por posibles interacciones con sus medicamentos actuales."
        }
        Language::Pt => {
            "Algumas secções foram realçadas devido a possíveis interações com os seus medicamentos atuais."
        }
        Language::Da => {
            "Nogle afsnit er fremhævet på grund af mulige interaktioner med din nuværende medicin."
        }
    }
}

fn default_text(lang: Language) -> &'static str {
    match lang {
        Language::En => "This ePI has been adapted to your personal health profile.",
        Language::Es => "Este prospecto ha sido adaptado a su perfil de salud personal.",
        Language::Pt => "Este folheto foi adaptado ao seu perfil de saúde pessoal.",
        Language::Da => "Denne indlægsseddel er tilpasset din personlige sundhedsprofil.",
    }
}

fn condition_fragments(lang: Language) -> Fragments {
    match lang {
        Language::En => Fragments {
            prefix: "This leaflet has been highlighted because of",
            glue: " and ",
            noun: "health conditions",
            filler: "recorded in your patient summary",
        },
        Language::Es => Fragments {
            prefix: "Este prospecto se ha resaltado debido a",
            glue: " y ",
            noun: "condiciones de salud",
            filler: "registradas en su resumen clínico",
        },
        Language::Pt => Fragments {
            prefix: "Este folheto foi realçado devido a",
            glue: " e ",
            noun: "condições de saúde",
            filler: "registadas no seu resumo clínico",
        },
        Language::Da => Fragments {
            prefix: "Denne indlægsseddel er fremhævet på grund af",
            glue: " og ",
            noun: "helbredstilstande",
            filler: "registreret i dit patientresumé",
        },
    }
}

fn allergy_fragments(lang: Language) -> Fragments {
    match lang {
        Language::En => Fragments {
            prefix: "Some sections are highlighted because of your",
            glue: " and ",
            noun: "registered allergies",
            filler: "listed in your patient summary",
        },
        Language::Es => Fragments {
            prefix: "Se han resaltado secciones debido a su",
            glue: " y ",
            noun: "alergias registradas",
            filler: "en su resumen clínico",
        },
        Language::Pt => Fragments {
            prefix: "Algumas secções foram realçadas devido a",
            glue: " e ",
            noun: "alergias registadas",
            filler: "no seu resumo clínico",
        },
        Language::Da => Fragments {
            prefix: "Nogle afsnit er fremhævet på grund af dine",
            glue: " og ",
            noun: "registrerede allergier",
            filler: "fra dit patientresumé",
        },
    }
}
