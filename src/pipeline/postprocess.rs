//! Post-processing: deterministic cleanup of recogniser and model output.
//!
//! Two kinds of text pass through here:
//!
//! - **Recognized text** — OCR engines emit CRLF line endings, form feeds,
//!   zero-width characters and runs of blank lines. [`clean_recognized_text`]
//!   removes them without touching content, so the rule-based parser sees
//!   one printed line per text line.
//! - **Model replies** — despite the prompt, models sometimes wrap JSON in
//!   ```` ```json ```` fences. [`strip_code_fences`] removes them leniently and
//!   [`parse_candidates`] turns the remaining JSON into
//!   [`MedicineCandidate`]s.

use crate::error::MalformedExtraction;
use crate::model::MedicineCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

// ── Recognized text ──────────────────────────────────────────────────────────

/// Apply all text cleanup rules to raw recogniser output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF/CR → LF) and page breaks (form feed → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Trim the whole text
pub fn clean_recognized_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

fn normalise_line_endings(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{000C}', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Model replies ────────────────────────────────────────────────────────────

/// Strip a leading ```` ```json ```` / ```` ``` ```` and a trailing ```` ``` ````.
///
/// Absence of fences is not an error: the trimmed input is returned as-is.
pub fn strip_code_fences(input: &str) -> String {
    let mut s = input.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest.trim();
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest.trim();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim();
    }
    s.to_string()
}

/// Parse a (fence-stripped) model reply into candidates.
///
/// Accepts a JSON array of objects, or a single object. Array items that
/// are not objects are skipped. Anything else is a [`MalformedExtraction`].
pub fn parse_candidates(json: &str) -> Result<Vec<MedicineCandidate>, MalformedExtraction> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| MalformedExtraction::new(format!("invalid JSON: {e}")))?;

    match value {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::Object(_) => Some(candidate_from_value(item)),
                other => {
                    warn!("Skipping non-object medicine entry #{}: {}", i, other);
                    None
                }
            })
            .collect()),
        obj @ Value::Object(_) => Ok(vec![candidate_from_value(&obj)]),
        other => Err(MalformedExtraction::new(format!(
            "expected a JSON array of medicines, got {}",
            json_type_name(&other)
        ))),
    }
}

fn candidate_from_value(value: &Value) -> MedicineCandidate {
    MedicineCandidate {
        medicine_name: text_field(value.get("medicine_name")),
        dosage: text_field(value.get("dosage")),
        quantity: text_field(value.get("quantity")),
        frequency: text_field(value.get("frequency")),
        timings: timings_field(value.get("timings")),
    }
}

/// Coerce a JSON field to text. `null` and absent fields are missing.
fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

static RE_TIMING_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:,|/|;|\band\b|&)\s*").unwrap());

/// Timings may arrive as an array or as one string ("morning, night").
fn timings_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => RE_TIMING_SEPARATOR
            .split(s)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        let input = "```json\n[{\"medicine_name\": \"A\"}]\n```";
        assert_eq!(strip_code_fences(input), "[{\"medicine_name\": \"A\"}]");
    }

    #[test]
    fn test_strip_bare_fence() {
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(strip_code_fences("  [1, 2]\n"), "[1, 2]");
    }

    #[test]
    fn test_only_trailing_fence() {
        assert_eq!(strip_code_fences("[]\n```"), "[]");
    }

    #[test]
    fn test_clean_recognized_text() {
        let input = "\u{FEFF}Rx\r\nMetformin 500mg   \r\n\n\n\n\n\u{000C}Amlo\u{200B}dipine 5mg\n";
        let out = clean_recognized_text(input);
        assert!(out.starts_with("Rx\nMetformin 500mg\n"));
        assert!(out.contains("Amlodipine 5mg"));
        assert!(!out.contains("\n\n\n\n"));
        assert!(!out.ends_with('\n'));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[
            {"medicine_name": "Metformin", "dosage": "500mg", "quantity": "N/A",
             "frequency": "twice a day", "timings": ["morning", "evening"]}
        ]"#;
        let c = parse_candidates(json).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].medicine_name.as_deref(), Some("Metformin"));
        assert_eq!(c[0].timings, vec!["morning", "evening"]);
    }

    #[test]
    fn test_parse_nulls_and_numbers() {
        let json = r#"[{"medicine_name": "Aspirin", "dosage": 75, "quantity": null}]"#;
        let c = parse_candidates(json).unwrap();
        assert_eq!(c[0].dosage.as_deref(), Some("75"));
        assert_eq!(c[0].quantity, None);
        assert_eq!(c[0].frequency, None);
        assert!(c[0].timings.is_empty());
    }

    #[test]
    fn test_parse_single_object() {
        let c = parse_candidates(r#"{"medicine_name": "Cetirizine"}"#).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_parse_skips_non_objects() {
        let c = parse_candidates(r#"["oops", {"medicine_name": "A"}, 3]"#).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].medicine_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_parse_string_timings() {
        let c = parse_candidates(r#"[{"timings": "Morning, afternoon and night"}]"#).unwrap();
        assert_eq!(c[0].timings, vec!["Morning", "afternoon", "night"]);
    }

    #[test]
    fn test_malformed() {
        assert!(parse_candidates("Sorry, I cannot read this prescription.").is_err());
        let err = parse_candidates("\"just a string\"").unwrap_err();
        assert!(err.detail.contains("a string"));
    }
}
