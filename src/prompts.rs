//! Prompts for model-backed prescription extraction.
//!
//! Keeping prompts here means the output contract the model is asked to
//! honour can be inspected by tests without calling a model, and changed in
//! exactly one place.
//!
//! Callers can override the extraction prompt via
//! [`crate::config::PipelineConfig::prompt_template`]; the template must
//! contain a `{text}` placeholder.

/// Default extraction prompt. `{text}` is replaced with the recognized text.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert medical prescription parser.
Extract structured data from the prescription text below.

Required fields:
- medicine_name: The medication name
- dosage: Amount per dose (e.g., "500mg", "1 tablet")
- quantity: Total prescribed (e.g., "10 tablets", "1 bottle")
- frequency: How often (e.g., "twice a day", "thrice a day")
- timings: MUST be an array with ONLY these values: "morning", "afternoon", "evening", "night"

CRITICAL RULES:
1. If any field is missing or unclear, use the string "N/A" (never null, never empty)
2. For timings, ONLY use: "morning", "afternoon", "evening", "night"
3. If timing is unclear (like "before food", "after food"), infer reasonable times
4. "thrice a day" usually means ["morning", "afternoon", "evening"]
5. "twice a day" usually means ["morning", "evening"]
6. If you cannot determine timing, use ["morning"]
7. Return ONLY a raw JSON array: no markdown, no code fences, no commentary

Prescription text:
{text}

Example output:
[
  {
    "medicine_name": "Metformin",
    "dosage": "250mg",
    "quantity": "N/A",
    "frequency": "thrice a day",
    "timings": ["morning", "afternoon", "evening"]
  }
]"#;

/// Prompt for the vision recogniser: transcribe, do not interpret.
pub const TRANSCRIPTION_PROMPT: &str = r#"You are an OCR engine. Transcribe every line of text visible in this prescription image.

Rules:
- Keep one printed or handwritten line per output line, in reading order
- Copy medicine names, strengths and dosing instructions exactly as written
- Do NOT summarise, reorder, translate or correct medical terms
- Do NOT wrap the output in code fences or add commentary"#;

/// Build the extraction prompt for `text`, using `template` when given.
pub fn extraction_prompt(template: Option<&str>, text: &str) -> String {
    template
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT)
        .replace("{text}", text)
}
