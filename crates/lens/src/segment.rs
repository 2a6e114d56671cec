//! Leaflet narrative assembly and re-segmentation.
//!
//! Before a lens runs, every section's `text.div` is concatenated into one
//! xhtml string (recursing through subsections and contained resources).
//! Afterwards the enhanced string is split back into sections: each `div`
//! carrying the xhtml namespace becomes one section, paired index-wise
//! with the original list so titles and codes survive.

use serde_json::{json, Value};

use epi::document::{default_section, default_section_code};

/// Namespace that marks a section wrapper div.
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Concatenate all narrative fragments of the leaflet sections.
pub fn collect_leaflet_html(sections: &[Value]) -> String {
    let mut html = String::new();
    for section in sections {
        collect_section(section, &mut html);
    }
    html
}

fn collect_section(section: &Value, out: &mut String) {
    if let Some(div) = section.pointer("/text/div").and_then(Value::as_str) {
        out.push_str(div);
    }
    if let Some(subsections) = section.get("section").and_then(Value::as_array) {
        for sub in subsections {
            collect_section(sub, out);
        }
    }
    if let Some(entries) = section.get("entry").and_then(Value::as_array) {
        for entry in entries {
            if let Some(contained) = entry.pointer("/resource/section").and_then(Value::as_array) {
                for sub in contained {
                    collect_section(sub, out);
                }
            }
        }
    }
}

/// Extract every `div` whose `xmlns` attribute equals [`XHTML_NS`].
///
/// A matched wrapper is consumed whole (nested wrappers inside it are not
/// extracted separately); scanning resumes after its closing tag. A lens
/// that strips the wrapper divs therefore yields nothing here — the caller
/// treats that as a segmentation failure.
pub fn split_enhanced_html(html: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut i = 0;
    while let Some(found) = html[i..].find("<div") {
        let start = i + found;
        let after_name = start + "<div".len();
        let at_boundary = html[after_name..]
            .chars()
            .next()
            .map(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
            .unwrap_or(false);
        if !at_boundary {
            i = after_name;
            continue;
        }
        let Some(tag_close) = html[start..].find('>') else {
            break;
        };
        let tag_end = start + tag_close;
        let tag = &html[start..=tag_end];
        if tag_attr(tag, "xmlns").as_deref() != Some(XHTML_NS) {
            i = tag_end + 1;
            continue;
        }
        if tag.trim_end_matches('>').ends_with('/') {
            parts.push(tag.to_string());
            i = tag_end + 1;
            continue;
        }
        match find_matching_close(html, tag_end + 1) {
            Some(end) => {
                parts.push(html[start..end].to_string());
                i = end;
            }
            None => {
                i = tag_end + 1;
            }
        }
    }
    parts
}

/// Byte index just past the `</div>` matching an already-open div.
fn find_matching_close(html: &str, mut i: usize) -> Option<usize> {
    let mut depth = 1usize;
    while depth > 0 {
        let next_open = html[i..].find("<div");
        let next_close = html[i..].find("</div>");
        match (next_open, next_close) {
            (Some(open), Some(close)) if open < close => {
                let abs = i + open;
                let after_name = abs + "<div".len();
                let at_boundary = html[after_name..]
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
                    .unwrap_or(false);
                if !at_boundary {
                    i = after_name;
                    continue;
                }
                let tag_close = html[abs..].find('>')?;
                let tag = &html[abs..=abs + tag_close];
                if !tag.trim_end_matches('>').ends_with('/') {
                    depth += 1;
                }
                i = abs + tag_close + 1;
            }
            (_, Some(close)) => {
                depth -= 1;
                i = i + close + "</div>".len();
            }
            _ => return None,
        }
    }
    Some(i)
}

/// Value of one attribute inside an opening `<div …>` tag.
fn tag_attr(tag: &str, name: &str) -> Option<String> {
    let inner = tag
        .strip_prefix("<div")?
        .trim_end_matches('>')
        .trim_end_matches('/');
    let mut rest = inner.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        if name_end == 0 {
            return None;
        }
        let attr = &rest[..name_end];
        rest = rest[name_end..].trim_start();
        let mut value = None;
        if let Some(stripped) = rest.strip_prefix('=') {
            rest = stripped.trim_start();
            match rest.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let end = rest[1..].find(quote)?;
                    value = Some(rest[1..1 + end].to_string());
                    rest = &rest[1 + end + 1..];
                }
                _ => {
                    let end = rest
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(rest.len());
                    value = Some(rest[..end].to_string());
                    rest = &rest[end..];
                }
            }
        }
        if attr == name {
            return value;
        }
        rest = rest.trim_start();
    }
    None
}

/// Pair the i-th extracted div with the i-th original section, keeping its
/// title and code and synthesising defaults when missing. Surplus divs
/// become new sections.
pub fn resegment(original: &[Value], parts: Vec<String>) -> Vec<Value> {
    parts
        .into_iter()
        .enumerate()
        .map(|(i, div)| {
            let mut section = match original.get(i) {
                Some(section) if section.is_object() => section.clone(),
                _ => default_section(i + 1),
            };
            let object = section.as_object_mut().expect("section is an object");
            if !object.contains_key("title") {
                object.insert("title".into(), Value::String(format!("Section {}", i + 1)));
            }
            if !object.contains_key("code") {
                object.insert("code".into(), default_section_code(i + 1));
            }
            let status = object
                .get("text")
                .and_then(|t| t.get("status"))
                .and_then(Value::as_str)
                .unwrap_or("additional")
                .to_owned();
            object.insert("text".into(), json!({ "status": status, "div": div }));
            section
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(body: &str) -> String {
        format!("<div xmlns=\"{XHTML_NS}\">{body}</div>")
    }

    #[test]
    fn collects_nested_narrative() {
        let sections = vec![json!({
            "text": { "div": "<p>a</p>" },
            "section": [
                { "text": { "div": "<p>b</p>" } },
                { "entry": [{ "resource": { "section": [{ "text": { "div": "<p>c</p>" } }] } }] },
            ],
        })];
        assert_eq!(collect_leaflet_html(&sections), "<p>a</p><p>b</p><p>c</p>");
    }

    #[test]
    fn splits_namespace_wrappers_only() {
        let html = format!(
            "{}<div class=\"plain\">skip</div>{}",
            wrapper("<p>one</p>"),
            wrapper("<p>two</p>")
        );
        let parts = split_enhanced_html(&html);
        assert_eq!(parts, vec![wrapper("<p>one</p>"), wrapper("<p>two</p>")]);
    }

    #[test]
    fn nested_divs_stay_inside_their_wrapper() {
        let html = wrapper("<div><p>inner</p></div><p>tail</p>");
        let parts = split_enhanced_html(&html);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("inner"));
        assert!(parts[0].contains("tail"));
    }

    #[test]
    fn single_quoted_and_self_closing_divs_parse() {
        let html = format!("<div xmlns='{XHTML_NS}'><p>q</p></div><div xmlns=\"{XHTML_NS}\"/>");
        let parts = split_enhanced_html(&html);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn unwrapped_output_yields_nothing() {
        assert!(split_enhanced_html("<p>no wrappers here</p>").is_empty());
    }

    #[test]
    fn resegment_preserves_titles_and_synthesises_defaults() {
        let original = vec![json!({
            "title": "1. What it is",
            "code": { "coding": [{ "code": "custom" }] },
            "text": { "status": "generated", "div": "old" },
        })];
        let parts = vec![wrapper("<p>new one</p>"), wrapper("<p>new two</p>")];

        let sections = resegment(&original, parts);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0]["title"], "1. What it is");
        assert_eq!(sections[0]["code"]["coding"][0]["code"], "custom");
        assert_eq!(sections[0]["text"]["status"], "generated");
        assert!(sections[0]["text"]["div"].as_str().unwrap().contains("new one"));

        assert_eq!(sections[1]["title"], "Section 2");
        assert_eq!(
            sections[1]["code"]["coding"][0]["system"],
            epi::SECTION_CODE_SYSTEM
        );
    }
}
