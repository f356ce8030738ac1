//! Model-backed extraction: prompt a chain of models until one answers.
//!
//! The prompt itself lives in [`crate::prompts`]; this module owns only the
//! call seam ([`ModelBackend`]) and the fallback policy.
//!
//! ## Fallback Strategy
//!
//! Rate limits and quota errors are per model, so a failure moves on to the
//! *next* model in the chain instead of retrying the same one. Between
//! attempts the loop waits:
//!
//! * the provider-suggested delay when the error says `retry in N s`,
//!   capped at `max_suggested_delay_secs`;
//! * otherwise `retry_backoff_ms * 2^attempt` (1 s → 2 s → 4 s with the
//!   default 1000 ms base).
//!
//! There is no wait after the last model. The loop is bounded by the chain
//! length, so a run makes at most `N` calls.

use crate::config::PipelineConfig;
use crate::error::{ModelCallError, PrescriptionError};
use crate::pipeline::postprocess::strip_code_fences;
use crate::progress::ProgressCallback;
use crate::prompts::extraction_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Text generation seam. Implemented by [`EdgequakeBackend`] in production
/// and by scripted fakes in tests.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send `prompt` to `model` and return the raw reply text.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelCallError>;
}

// ── edgequake-llm backend ────────────────────────────────────────────────────

/// [`ModelBackend`] over `edgequake-llm` providers.
///
/// One provider handle per model is created at construction and reused for
/// every call.
pub struct EdgequakeBackend {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    options: CompletionOptions,
    timeout: Duration,
}

impl EdgequakeBackend {
    /// Create one provider per model in `config.fallback_models`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PrescriptionError> {
        let mut providers = HashMap::with_capacity(config.fallback_models.len());
        for model in &config.fallback_models {
            let provider = create_provider(&config.provider_name, model)?;
            providers.insert(model.clone(), provider);
        }
        debug!(
            "Initialised {} '{}' model handles",
            providers.len(),
            config.provider_name
        );
        Ok(Self::with_providers(providers, config))
    }

    /// Wrap pre-built providers, keyed by model name.
    pub fn with_providers(
        providers: impl IntoIterator<Item = (String, Arc<dyn LLMProvider>)>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            providers: providers.into_iter().collect(),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl ModelBackend for EdgequakeBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelCallError> {
        let provider = self
            .providers
            .get(model)
            .ok_or_else(|| ModelCallError::new(format!("no provider handle for model '{model}'")))?;

        let messages = vec![ChatMessage::user(prompt)];

        match tokio::time::timeout(self.timeout, provider.chat(&messages, Some(&self.options)))
            .await
        {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    model, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Ok(Err(e)) => Err(ModelCallError::new(format!("{}", e))),
            Err(_) => Err(ModelCallError::new(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Instantiate a named provider for one model.
pub fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PrescriptionError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PrescriptionError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Fallback extractor ───────────────────────────────────────────────────────

/// A successful model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    /// Reply text with code fences removed.
    pub json: String,
    /// The model that answered.
    pub model: String,
    /// Calls made, including the successful one.
    pub attempts: usize,
}

/// Runs the fallback chain against a [`ModelBackend`].
pub struct ModelExtractor {
    backend: Arc<dyn ModelBackend>,
    models: Vec<String>,
    prompt_template: Option<String>,
    retry_backoff_ms: u64,
    max_suggested_delay: Duration,
    progress: Option<ProgressCallback>,
}

impl ModelExtractor {
    pub fn new(backend: Arc<dyn ModelBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            models: config.fallback_models.clone(),
            prompt_template: config.prompt_template.clone(),
            retry_backoff_ms: config.retry_backoff_ms,
            max_suggested_delay: Duration::from_secs(config.max_suggested_delay_secs),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Extract a raw JSON medicine list from recognized text.
    ///
    /// Returns [`PrescriptionError::ExtractionExhausted`] when every model
    /// in the chain failed.
    pub async fn extract(&self, text: &str) -> Result<ModelReply, PrescriptionError> {
        if self.models.is_empty() {
            return Err(PrescriptionError::InvalidConfig(
                "Model fallback chain is empty".into(),
            ));
        }

        let prompt = extraction_prompt(self.prompt_template.as_deref(), text);
        let total = self.models.len();
        let mut last_err = String::new();

        for (attempt, model) in self.models.iter().enumerate() {
            info!("Extracting with {} (attempt {}/{})", model, attempt + 1, total);
            if let Some(ref cb) = self.progress {
                cb.on_model_attempt(attempt + 1, total, model);
            }

            match self.backend.generate(model, &prompt).await {
                Ok(reply) => {
                    info!("Extraction succeeded with {}", model);
                    return Ok(ModelReply {
                        json: strip_code_fences(&reply),
                        model: model.clone(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) => {
                    let wait = (attempt + 1 < total).then(|| {
                        backoff_delay(
                            attempt,
                            &e.message,
                            self.retry_backoff_ms,
                            self.max_suggested_delay,
                        )
                    });
                    match wait {
                        Some(w) => warn!("{} failed: {}. Next model in {:?}", model, e, w),
                        None => warn!("{} failed: {}. No models left", model, e),
                    }
                    if let Some(ref cb) = self.progress {
                        cb.on_model_failure(model, &e.message, wait);
                    }
                    last_err = e.message;
                    if let Some(w) = wait {
                        sleep(w).await;
                    }
                }
            }
        }

        Err(PrescriptionError::ExtractionExhausted {
            attempts: total,
            last_error: last_err,
        })
    }
}

static RE_RETRY_IN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)").unwrap());

/// The provider's suggested delay, if the message carries one.
pub fn suggested_retry_secs(message: &str) -> Option<f64> {
    RE_RETRY_IN
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Delay before the attempt following `attempt` (0-based).
pub fn backoff_delay(attempt: usize, message: &str, base_ms: u64, cap: Duration) -> Duration {
    if let Some(secs) = suggested_retry_secs(message) {
        return Duration::from_secs_f64(secs.min(cap.as_secs_f64()));
    }
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PipelineProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `fail_first` calls with `message`, then answers.
    struct ScriptedBackend {
        fail_first: usize,
        message: String,
        calls: AtomicUsize,
        seen_models: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(fail_first: usize, message: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                message: message.to_string(),
                calls: AtomicUsize::new(0),
                seen_models: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(&self, model: &str, _prompt: &str) -> Result<String, ModelCallError> {
            self.seen_models.lock().unwrap().push(model.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ModelCallError::new(self.message.clone()))
            } else {
                Ok(format!("```json\n[{{\"medicine_name\": \"{model}\"}}]\n```"))
            }
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .fallback_models(["m0", "m1", "m2", "m3"])
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn third_model_answers_after_two_failures() {
        let backend = ScriptedBackend::new(2, "429 quota exceeded");
        let extractor = ModelExtractor::new(backend.clone(), &config());

        let reply = extractor.extract("Metformin 500mg").await.unwrap();
        assert_eq!(reply.attempts, 3);
        assert_eq!(reply.model, "m2");
        assert_eq!(reply.json, r#"[{"medicine_name": "m2"}]"#);
        assert_eq!(*backend.seen_models.lock().unwrap(), vec!["m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_every_model_failed() {
        let backend = ScriptedBackend::new(usize::MAX, "503 overloaded");
        let extractor = ModelExtractor::new(backend.clone(), &config());

        let err = extractor.extract("x").await.unwrap_err();
        match err {
            PrescriptionError::ExtractionExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "503 overloaded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_between_models() {
        let backend = ScriptedBackend::new(2, "internal error");
        let extractor = ModelExtractor::new(backend, &config());

        let start = Instant::now();
        extractor.extract("x").await.unwrap();
        // 1 s after m0, 2 s after m1.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_last_model() {
        let backend = ScriptedBackend::new(usize::MAX, "boom");
        let config = PipelineConfig::builder()
            .fallback_models(["only"])
            .build()
            .unwrap();
        let extractor = ModelExtractor::new(backend, &config);

        let start = Instant::now();
        assert!(extractor.extract("x").await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn suggested_delay_is_capped() {
        let backend = ScriptedBackend::new(1, "Quota exceeded. Please retry in 30s.");
        let extractor = ModelExtractor::new(backend, &config());

        let start = Instant::now();
        let reply = extractor.extract("x").await.unwrap();
        assert_eq!(reply.attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_attempts_and_waits() {
        #[derive(Default)]
        struct Recorder {
            attempts: Mutex<Vec<(usize, usize)>>,
            waits: Mutex<Vec<Option<Duration>>>,
        }
        impl PipelineProgressCallback for Recorder {
            fn on_model_attempt(&self, attempt: usize, total: usize, _model: &str) {
                self.attempts.lock().unwrap().push((attempt, total));
            }
            fn on_model_failure(&self, _model: &str, _error: &str, wait: Option<Duration>) {
                self.waits.lock().unwrap().push(wait);
            }
        }

        let recorder = Arc::new(Recorder::default());
        let config = PipelineConfig::builder()
            .fallback_models(["a", "b"])
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let extractor = ModelExtractor::new(ScriptedBackend::new(usize::MAX, "x"), &config);
        let _ = extractor.extract("x").await;

        assert_eq!(*recorder.attempts.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(
            *recorder.waits.lock().unwrap(),
            vec![Some(Duration::from_secs(1)), None]
        );
    }

    #[test]
    fn suggested_retry_parsing() {
        assert_eq!(suggested_retry_secs("please RETRY IN 17.5s"), Some(17.5));
        assert_eq!(suggested_retry_secs("retry in 4 seconds"), Some(4.0));
        assert_eq!(suggested_retry_secs("rate limited"), None);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(0, "", 1000, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, "", 1000, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, "", 1000, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(0, "retry in 3", 1000, cap), Duration::from_secs(3));
        assert_eq!(
            backoff_delay(0, "retry in 99999999999999999999999", 1000, cap),
            cap
        );
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&PipelineConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2048));
    }
}
