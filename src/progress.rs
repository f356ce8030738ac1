//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a prescription moves through recognition, extraction and
//! materialisation. The CLI uses this to drive its spinner.
//!
//! # Example
//!
//! ```rust
//! use medisched::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     created: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_schedule_created(&self, medicine_name: &str) {
//!         self.created.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("scheduled {medicine_name}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { created: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::model::SkipReason;
use std::sync::Arc;
use std::time::Duration;

/// Called by the pipeline at each stage boundary.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once the recogniser has returned text.
    fn on_recognition_complete(&self, chars: usize) {
        let _ = chars;
    }

    /// Called just before a model in the fallback chain is tried.
    ///
    /// # Arguments
    /// * `attempt` — 1-indexed attempt number
    /// * `total`   — length of the fallback chain
    /// * `model`   — model identifier
    fn on_model_attempt(&self, attempt: usize, total: usize, model: &str) {
        let _ = (attempt, total, model);
    }

    /// Called when a model fails. `wait` is `None` when no model remains.
    fn on_model_failure(&self, model: &str, error: &str, wait: Option<Duration>) {
        let _ = (model, error, wait);
    }

    /// Called once candidates have been extracted and normalised.
    fn on_extraction_complete(&self, medicine_count: usize) {
        let _ = medicine_count;
    }

    fn on_schedule_created(&self, medicine_name: &str) {
        let _ = medicine_name;
    }

    fn on_schedule_skipped(&self, medicine_name: &str, reason: SkipReason) {
        let _ = (medicine_name, reason);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
