//! Error types for the medisched library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PrescriptionError`] — **Fatal**: the run cannot produce a schedule at
//!   all (recognition backend down, every fallback model failed, unknown
//!   user). Returned as `Err(PrescriptionError)` from the pipeline entry
//!   points. Nothing is persisted for a run that ends this way.
//!
//! * [`MalformedExtraction`] — **Non-fatal**: the extractor answered, but
//!   its answer did not parse as a medicine list. The pipeline substitutes a
//!   single placeholder entry and stores the warning in
//!   [`crate::model::PipelineOutput::extraction_warning`].
//!
//! Callers branch on [`PrescriptionError::kind`] rather than on message text.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Coarse category of a fatal error, for callers that map errors onto
/// transport status codes (404 / 400 / 503 / 500).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced user or record does not exist.
    NotFound,
    /// The caller supplied something the pipeline cannot work with.
    InvalidInput,
    /// A collaborator is temporarily unavailable; retrying later may succeed.
    Unavailable,
    /// Anything else.
    Internal,
}

/// All fatal errors returned by the medisched library.
#[derive(Debug, Error)]
pub enum PrescriptionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Prescription file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    // ── Identity / storage lookups ────────────────────────────────────────
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("Schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: Uuid },

    // ── Stage failures ────────────────────────────────────────────────────
    /// The text-recognition stage failed; the run is aborted.
    #[error("Text recognition failed: {0}")]
    Recognition(#[from] RecognitionError),

    /// Every model in the fallback chain failed.
    #[error(
        "Extraction service temporarily unavailable. Please try again in a minute. \
(Tried {attempts} models; last error: {last_error})"
    )]
    ExtractionExhausted { attempts: usize, last_error: String },

    /// The configured model provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Storage ───────────────────────────────────────────────────────────
    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrescriptionError {
    /// Classify this error so callers can branch without string matching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrescriptionError::FileNotFound { .. }
            | PrescriptionError::PermissionDenied { .. } => ErrorKind::InvalidInput,
            PrescriptionError::UserNotFound { .. } | PrescriptionError::ScheduleNotFound { .. } => {
                ErrorKind::NotFound
            }
            PrescriptionError::Recognition(e) => e.kind(),
            PrescriptionError::ExtractionExhausted { .. }
            | PrescriptionError::ProviderNotConfigured { .. } => ErrorKind::Unavailable,
            PrescriptionError::InvalidConfig(_) | PrescriptionError::Internal(_) => {
                ErrorKind::Internal
            }
            PrescriptionError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            PrescriptionError::Store(_) => ErrorKind::Internal,
        }
    }

    /// `true` when the caller is invited to retry the same request later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

/// Errors raised by a [`crate::pipeline::recognize::TextRecognizer`].
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The engine is missing (binary not installed, endpoint not set).
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    /// The input is neither a supported image nor a document.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The engine ran but rejected the input or returned an error.
    #[error("Recognition failed: {0}")]
    Failed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl RecognitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecognitionError::BackendNotAvailable(_) | RecognitionError::Http(_) => {
                ErrorKind::Unavailable
            }
            RecognitionError::UnsupportedInput(_) => ErrorKind::InvalidInput,
            RecognitionError::Failed(_)
            | RecognitionError::Io(_)
            | RecognitionError::Archive(_) => ErrorKind::Internal,
        }
    }
}

/// Errors raised by a [`crate::store::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: String },

    #[error("Failed to serialise record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (connection dropped, lock poisoned, …).
    #[error("{0}")]
    Backend(String),
}

/// One model call failed.
///
/// The provider's message is kept verbatim: the fallback loop reads
/// "retry in N s" hints out of it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ModelCallError {
    pub message: String,
}

impl ModelCallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A non-fatal extraction failure: the extractor's answer did not parse as
/// a medicine list.
///
/// Stored in [`crate::model::PipelineOutput`] when the pipeline fell back to
/// the placeholder medicine entry.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("Malformed extraction: {detail}")]
pub struct MalformedExtraction {
    pub detail: String,
}

impl MalformedExtraction {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
