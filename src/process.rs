//! Pipeline entry points: prescription in, schedules out.
//!
//! [`PrescriptionPipeline`] owns the injected collaborators (recognizer,
//! extractor, document store) and runs one prescription at a time through
//! the stages, strictly in order:
//!
//! 1. verify the user
//! 2. resolve the input (spooling uploaded bytes to a temp file)
//! 3. recognize text
//! 4. extract candidates (model-backed *or* rule-based)
//! 5. normalize
//! 6. persist the prescription, then materialize schedules
//!
//! Nothing is written to the store before step 6, so a run that fails in
//! recognition or extraction leaves no records behind.

use crate::config::PipelineConfig;
use crate::error::{PrescriptionError, RecognitionError, StoreError};
use crate::model::{
    ExtractionStrategy, MedicineCandidate, PipelineOutput, PipelineStats, PrescriptionRecord,
};
use crate::pipeline::llm::{EdgequakeBackend, ModelBackend, ModelExtractor};
use crate::pipeline::recognize::{recognize_input, TextRecognizer};
use crate::pipeline::{input, materialize, normalize, postprocess, rules};
use crate::store::DocumentStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which extractor a pipeline runs.
pub enum Extractor {
    Model(ModelExtractor),
    Rules,
}

impl Extractor {
    pub fn strategy(&self) -> ExtractionStrategy {
        match self {
            Extractor::Model(_) => ExtractionStrategy::Model,
            Extractor::Rules => ExtractionStrategy::Rules,
        }
    }
}

/// A configured prescription pipeline.
///
/// # Example
/// ```rust
/// use medisched::{ExtractionStrategy, MemoryStore, PipelineConfig, PrescriptionPipeline};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::new());
/// store.register_user("user-1")?;
///
/// let config = PipelineConfig::builder()
///     .strategy(ExtractionStrategy::Rules)
///     .build()?;
/// let pipeline = PrescriptionPipeline::new(config, store)?;
///
/// let output = pipeline
///     .process_text("Metformin 500mg twice a day", "user-1")
///     .await?;
/// assert_eq!(output.schedule_ids.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct PrescriptionPipeline {
    recognizer: Option<Arc<dyn TextRecognizer>>,
    extractor: Extractor,
    store: Arc<dyn DocumentStore>,
    config: PipelineConfig,
}

impl PrescriptionPipeline {
    /// Build a pipeline for `config.strategy`.
    ///
    /// The model-backed strategy creates its `edgequake-llm` providers here,
    /// once, so a missing API key fails fast. No recognizer is attached; add
    /// one with [`Self::with_recognizer`] before calling the file entry points.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, PrescriptionError> {
        let extractor = match config.strategy {
            ExtractionStrategy::Model => {
                let backend = Arc::new(EdgequakeBackend::from_config(&config)?);
                Extractor::Model(ModelExtractor::new(backend, &config))
            }
            ExtractionStrategy::Rules => Extractor::Rules,
        };
        Ok(Self {
            recognizer: None,
            extractor,
            store,
            config,
        })
    }

    /// Build a model-backed pipeline around an existing [`ModelBackend`].
    pub fn with_backend(
        config: PipelineConfig,
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let extractor = Extractor::Model(ModelExtractor::new(backend, &config));
        Self {
            recognizer: None,
            extractor,
            store,
            config,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.extractor.strategy()
    }

    /// Process a prescription image or PDF on disk.
    pub async fn process_file(
        &self,
        path: impl AsRef<Path>,
        user_id: &str,
    ) -> Result<PipelineOutput, PrescriptionError> {
        let start = Instant::now();
        info!("Processing {} for user {}", path.as_ref().display(), user_id);
        self.verify_user(user_id)?;
        let resolved = input::resolve_local(path)?;
        self.run_resolved(&resolved, user_id, start).await
    }

    /// Process an uploaded prescription held in memory.
    ///
    /// The bytes are written to a temp file that is removed when this
    /// returns, on success and on every error path.
    pub async fn process_bytes(
        &self,
        bytes: &[u8],
        user_id: &str,
    ) -> Result<PipelineOutput, PrescriptionError> {
        let start = Instant::now();
        info!("Processing {} uploaded bytes for user {}", bytes.len(), user_id);
        self.verify_user(user_id)?;
        let resolved = input::spool_bytes(bytes)?;
        self.run_resolved(&resolved, user_id, start).await
    }

    /// Process text that was already recognized elsewhere.
    pub async fn process_text(
        &self,
        text: &str,
        user_id: &str,
    ) -> Result<PipelineOutput, PrescriptionError> {
        let start = Instant::now();
        self.verify_user(user_id)?;
        let text = postprocess::clean_recognized_text(text);
        let stats = PipelineStats {
            recognized_chars: text.len(),
            ..Default::default()
        };
        self.extract_and_store(&text, user_id, stats, start).await
    }

    /// Blocking wrapper around [`Self::process_file`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn process_file_sync(
        &self,
        path: impl AsRef<Path>,
        user_id: &str,
    ) -> Result<PipelineOutput, PrescriptionError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| PrescriptionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.process_file(path, user_id))
    }

    // ── Stages ───────────────────────────────────────────────────────────

    fn verify_user(&self, user_id: &str) -> Result<(), PrescriptionError> {
        if self.config.verify_user && !self.store.user_exists(user_id)? {
            return Err(PrescriptionError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    async fn run_resolved(
        &self,
        resolved: &input::ResolvedInput,
        user_id: &str,
        start: Instant,
    ) -> Result<PipelineOutput, PrescriptionError> {
        let recognizer = self.recognizer.as_ref().ok_or_else(|| {
            RecognitionError::BackendNotAvailable("no text recognizer configured".into())
        })?;

        let recognition_start = Instant::now();
        let text = recognize_input(recognizer.as_ref(), resolved).await?;
        let stats = PipelineStats {
            recognized_chars: text.len(),
            recognition_ms: recognition_start.elapsed().as_millis() as u64,
            ..Default::default()
        };
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_recognition_complete(text.len());
        }
        if text.is_empty() {
            warn!("{} recognized no text", recognizer.name());
        }

        self.extract_and_store(&text, user_id, stats, start).await
    }

    async fn extract_and_store(
        &self,
        text: &str,
        user_id: &str,
        mut stats: PipelineStats,
        start: Instant,
    ) -> Result<PipelineOutput, PrescriptionError> {
        stats.strategy = self.extractor.strategy();

        // ── Extract ──────────────────────────────────────────────────────
        let extraction_start = Instant::now();
        let mut extraction_warning = None;
        let candidates = match &self.extractor {
            Extractor::Rules => rules::parse_prescription(text),
            Extractor::Model(extractor) => {
                let reply = extractor.extract(text).await?;
                stats.model_used = Some(reply.model);
                stats.model_attempts = reply.attempts;
                match postprocess::parse_candidates(&reply.json) {
                    Ok(candidates) => candidates,
                    Err(malformed) => {
                        warn!("{}; using placeholder entry", malformed);
                        extraction_warning = Some(malformed);
                        vec![MedicineCandidate::placeholder()]
                    }
                }
            }
        };
        stats.extraction_ms = extraction_start.elapsed().as_millis() as u64;
        stats.candidate_count = candidates.len();
        debug!("Extracted {} candidates", candidates.len());

        // ── Normalize ────────────────────────────────────────────────────
        let medicines = normalize::normalize(&candidates);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(medicines.len());
        }

        // ── Persist ──────────────────────────────────────────────────────
        let record =
            PrescriptionRecord::new(user_id, text, &medicines).map_err(StoreError::from)?;
        self.store.insert_prescription(&record)?;

        let materialized = materialize::materialize(
            self.store.as_ref(),
            record.id,
            user_id,
            &medicines,
            self.config.progress_callback.as_ref(),
        )?;

        stats.total_ms = start.elapsed().as_millis() as u64;
        info!(
            "Prescription {}: {} medicines, {} schedules in {}ms",
            record.id,
            medicines.len(),
            materialized.records.len(),
            stats.total_ms
        );

        Ok(PipelineOutput {
            prescription_id: record.id,
            schedule_ids: materialized.records.iter().map(|r| r.id).collect(),
            medicines,
            skipped: materialized.skipped,
            extraction_warning,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelCallError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl ModelBackend for Reply {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, ModelCallError> {
            Ok(self.0.to_string())
        }
    }

    fn store_with_user() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register_user("u1").unwrap();
        store
    }

    fn rules_pipeline(store: Arc<MemoryStore>) -> PrescriptionPipeline {
        let config = PipelineConfig::builder()
            .strategy(ExtractionStrategy::Rules)
            .build()
            .unwrap();
        PrescriptionPipeline::new(config, store).unwrap()
    }

    #[tokio::test]
    async fn unknown_user_is_rejected_before_any_work() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = rules_pipeline(store.clone());
        let err = pipeline.process_text("Zinc 50mg", "ghost").await.unwrap_err();
        assert!(matches!(err, PrescriptionError::UserNotFound { .. }));
        assert_eq!(store.prescription_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn rules_strategy_creates_schedules() {
        let store = store_with_user();
        let pipeline = rules_pipeline(store.clone());
        let out = pipeline
            .process_text("Metformin 500mg twice a day\nTel. 9876543210", "u1")
            .await
            .unwrap();
        assert_eq!(out.stats.strategy, ExtractionStrategy::Rules);
        assert_eq!(out.medicines.len(), 1);
        assert_eq!(out.schedule_ids.len(), 1);
        assert_eq!(store.schedule_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_to_placeholder() {
        let store = store_with_user();
        let config = PipelineConfig::builder().build().unwrap();
        let pipeline =
            PrescriptionPipeline::with_backend(config, store.clone(), Arc::new(Reply("no idea")));

        let out = pipeline.process_text("smudged", "u1").await.unwrap();
        assert!(out.extraction_warning.is_some());
        assert_eq!(out.medicines.len(), 1);
        assert_eq!(out.medicines[0].medicine_name, "Unknown");
        assert!(out.schedule_ids.is_empty());
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(store.prescription_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn file_entry_point_needs_a_recognizer() {
        let store = store_with_user();
        let pipeline = rules_pipeline(store);
        let err = pipeline
            .process_bytes(b"%PDF-1.4\n", "u1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PrescriptionError::Recognition(RecognitionError::BackendNotAvailable(_))
        ));
    }
}
