//! # medisched
//!
//! Turn a photographed or scanned prescription into medicine reminder
//! schedules.
//!
//! ## Why this crate?
//!
//! Prescription scans are noisy: clinic letterheads, phone numbers, dates
//! and signatures sit next to the lines that matter. This crate recognizes
//! the text, extracts medicine entries with either a generative model (with
//! a fallback chain across models) or an offline rule-based parser, forces
//! every entry into one fixed shape, and stores one reminder schedule per
//! usable medicine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image / PDF
//!  │
//!  ├─ 1. Recognize    Tesseract, layout service, or vision model
//!  ├─ 2. Extract      model fallback chain  │  rule-based parser
//!  ├─ 3. Normalize    "N/A" for missing fields, timings ⊆ {morning, afternoon, evening, night}
//!  ├─ 4. Persist      prescription record (raw text + structured JSON)
//!  └─ 5. Materialize  one enabled schedule per valid medicine
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medisched::{MemoryStore, PipelineConfig, PrescriptionPipeline, TesseractRecognizer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.register_user("user-1")?;
//!
//!     // Model-backed extraction; reads GEMINI_API_KEY from the environment.
//!     let config = PipelineConfig::default();
//!     let pipeline = PrescriptionPipeline::new(config.clone(), store)?
//!         .with_recognizer(Arc::new(TesseractRecognizer::from_config(&config)));
//!
//!     let output = pipeline.process_file("prescription.jpg", "user-1").await?;
//!     for medicine in &output.medicines {
//!         println!("{} {} {:?}", medicine.medicine_name, medicine.dosage, medicine.timings);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medisched` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! medisched = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod schedules;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, DEFAULT_FALLBACK_MODELS};
pub use error::{
    ErrorKind, MalformedExtraction, ModelCallError, PrescriptionError, RecognitionError,
    StoreError,
};
pub use model::{
    ExtractionStrategy, MedicineCandidate, PipelineOutput, PipelineStats, PrescriptionRecord,
    RecognizedText, ScheduleRecord, SkipReason, SkippedMedicine, TimeSlot, ValidatedMedicine,
};
pub use pipeline::llm::{EdgequakeBackend, ModelBackend, ModelExtractor, ModelReply};
pub use pipeline::recognize::{
    LayoutServiceRecognizer, TesseractRecognizer, TextRecognizer, VisionRecognizer,
};
pub use process::{Extractor, PrescriptionPipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use schedules::{
    delete_schedule, list_prescriptions, list_schedules, mark_reminder_sent, toggle_schedule,
};
pub use store::{DocumentStore, MemoryStore};
