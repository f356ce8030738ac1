//! Pipeline stages for prescription-to-schedule extraction.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and engines can be swapped (Tesseract for a vision
//! model, model-backed for rule-based extraction) without touching the
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ recognize ──▶ llm │ rules ──▶ normalize ──▶ materialize
//! (path/bytes) (OCR)     (extract)       (validate)    (schedules)
//! ```
//!
//! 1. [`input`]       — classify the upload and spool bytes to a temp file
//! 2. [`recognize`]   — run a text-recognition engine; the only stage besides
//!    [`llm`] with I/O
//! 3. [`llm`]         — model-backed extraction with a model fallback chain
//!    ([`encode`] prepares images for vision models)
//! 4. [`rules`]       — offline, deterministic line parser
//! 5. [`postprocess`] — text cleanup and JSON reply parsing
//! 6. [`normalize`]   — enforce the output contract on every candidate
//! 7. [`materialize`] — turn validated medicines into stored schedules

pub mod encode;
pub mod input;
pub mod llm;
pub mod materialize;
pub mod normalize;
pub mod postprocess;
pub mod recognize;
pub mod rules;
