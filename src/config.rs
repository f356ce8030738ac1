//! Configuration types for a prescription pipeline run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Collaborator handles (recogniser, model
//! backend, document store) are *not* configuration: they are constructed
//! once and injected into [`crate::process::PrescriptionPipeline`].

use crate::error::PrescriptionError;
use crate::model::ExtractionStrategy;
use crate::progress::ProgressCallback;
use std::fmt;

/// Default model fallback chain, tried in order.
pub const DEFAULT_FALLBACK_MODELS: [&str; 4] = [
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
    "gemini-1.5-pro-latest",
    "gemini-pro",
];

/// Configuration for a prescription pipeline.
///
/// # Example
/// ```rust
/// use medisched::{ExtractionStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .strategy(ExtractionStrategy::Model)
///     .primary_model("gemini-2.0-flash")
///     .retry_backoff_ms(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.fallback_models[0], "gemini-2.0-flash");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Which extractor runs. Default: [`ExtractionStrategy::Model`].
    pub strategy: ExtractionStrategy,

    /// LLM provider name passed to `edgequake_llm::ProviderFactory`. Default: "gemini".
    pub provider_name: String,

    /// Ordered model fallback chain. Index 0 is tried first; each failure
    /// moves on to the next model, never retries the same one.
    pub fallback_models: Vec<String>,

    /// Sampling temperature for extraction. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Base delay between fallback attempts in milliseconds. Default: 1000.
    ///
    /// Doubles per attempt: 1 s → 2 s → 4 s.
    pub retry_backoff_ms: u64,

    /// Upper bound on a provider-suggested ("retry in N s") delay. Default: 10.
    pub max_suggested_delay_secs: u64,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction prompt. Must contain `{text}`. If None, uses the built-in prompt.
    pub prompt_template: Option<String>,

    /// Tesseract language code. Default: "eng".
    pub ocr_language: String,

    /// Endpoint of the layout-aware recognition service.
    pub layout_service_url: Option<String>,

    /// Bearer token for the layout-aware recognition service.
    pub layout_api_key: Option<String>,

    /// Timeout for a single recognition call in seconds. Default: 120.
    pub recognition_timeout_secs: u64,

    /// Reject runs for users the store does not know. Default: true.
    pub verify_user: bool,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::default(),
            provider_name: "gemini".to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            temperature: 0.1,
            max_tokens: 2048,
            retry_backoff_ms: 1000,
            max_suggested_delay_secs: 10,
            api_timeout_secs: 60,
            prompt_template: None,
            ocr_language: "eng".to_string(),
            layout_service_url: None,
            layout_api_key: None,
            recognition_timeout_secs: 120,
            verify_user: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("strategy", &self.strategy)
            .field("provider_name", &self.provider_name)
            .field("fallback_models", &self.fallback_models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_suggested_delay_secs", &self.max_suggested_delay_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("ocr_language", &self.ocr_language)
            .field("layout_service_url", &self.layout_service_url)
            .field("layout_api_key", &self.layout_api_key.as_ref().map(|_| "<redacted>"))
            .field("verify_user", &self.verify_user)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    /// Replace the whole fallback chain.
    pub fn fallback_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fallback_models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Put `model` at the head of the chain, removing any later duplicate.
    pub fn primary_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.config.fallback_models.retain(|m| *m != model);
        self.config.fallback_models.insert(0, model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_suggested_delay_secs(mut self, secs: u64) -> Self {
        self.config.max_suggested_delay_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn layout_service_url(mut self, url: impl Into<String>) -> Self {
        self.config.layout_service_url = Some(url.into());
        self
    }

    pub fn layout_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.layout_api_key = Some(key.into());
        self
    }

    pub fn recognition_timeout_secs(mut self, secs: u64) -> Self {
        self.config.recognition_timeout_secs = secs;
        self
    }

    pub fn verify_user(mut self, v: bool) -> Self {
        self.config.verify_user = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PrescriptionError> {
        let c = &self.config;
        if c.strategy == ExtractionStrategy::Model && c.fallback_models.is_empty() {
            return Err(PrescriptionError::InvalidConfig(
                "Model-backed extraction needs at least one model in the fallback chain".into(),
            ));
        }
        if c.fallback_models.iter().any(|m| m.trim().is_empty()) {
            return Err(PrescriptionError::InvalidConfig(
                "Fallback model names must not be empty".into(),
            ));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains("{text}") {
                return Err(PrescriptionError::InvalidConfig(
                    "Prompt template must contain a {text} placeholder".into(),
                ));
            }
        }
        if c.api_timeout_secs == 0 {
            return Err(PrescriptionError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
