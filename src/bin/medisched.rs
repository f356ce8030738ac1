//! CLI binary for medisched.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one prescription through an in-memory store and
//! prints the extracted schedule.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medisched::pipeline::materialize::skip_reason;
use medisched::{
    ExtractionStrategy, LayoutServiceRecognizer, MemoryStore, PipelineConfig, PipelineOutput,
    PipelineProgressCallback, PrescriptionPipeline, ProgressCallback, SkipReason,
    TesseractRecognizer, TextRecognizer, VisionRecognizer,
};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner whose message tracks the current stage,
/// plus one log line per model failure and per schedule.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Recognizing");
        bar.set_message("reading prescription…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_recognition_complete(&self, chars: usize) {
        self.bar.println(format!(
            "  {} Recognized {}",
            green("✓"),
            dim(&format!("{chars} chars"))
        ));
        self.bar.set_prefix("Extracting");
        self.bar.set_message("");
    }

    fn on_model_attempt(&self, attempt: usize, total: usize, model: &str) {
        self.bar.set_message(format!("{model} ({attempt}/{total})"));
    }

    fn on_model_failure(&self, model: &str, error: &str, wait: Option<Duration>) {
        let msg = if error.len() > 80 {
            let cut = error
                .char_indices()
                .nth(79)
                .map(|(i, _)| i)
                .unwrap_or(error.len());
            format!("{}\u{2026}", &error[..cut])
        } else {
            error.to_string()
        };
        let next = match wait {
            Some(w) => format!("next model in {:.1}s", w.as_secs_f64()),
            None => "no models left".to_string(),
        };
        self.bar
            .println(format!("  {} {}  {}  {}", red("✗"), model, red(&msg), dim(&next)));
    }

    fn on_extraction_complete(&self, medicine_count: usize) {
        self.bar.println(format!(
            "  {} Extracted {} medicines",
            green("✓"),
            bold(&medicine_count.to_string())
        ));
        self.bar.set_prefix("Scheduling");
    }

    fn on_schedule_created(&self, medicine_name: &str) {
        self.bar.set_message(medicine_name.to_string());
    }

    fn on_schedule_skipped(&self, medicine_name: &str, reason: SkipReason) {
        self.bar.println(format!(
            "  {} Skipped '{}'  {}",
            cyan("⚠"),
            medicine_name,
            dim(&reason.to_string())
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tesseract OCR + Gemini extraction (default)
  medisched prescription.jpg --user alice

  # Fully offline: Tesseract + rule-based parser
  medisched prescription.jpg --user alice --strategy rules

  # Already have the text
  medisched notes.txt --user alice --from-text --strategy rules
  echo "Metformin 500mg twice a day" | medisched - --user alice --from-text

  # PDF through a layout-aware OCR service
  medisched scan.pdf --user alice --recognizer layout \
      --layout-url https://ocr.example.com/v1/ocr

  # Pin the primary model, keep the default fallbacks behind it
  medisched prescription.png --user alice --model gemini-2.0-flash

  # JSON output
  medisched prescription.png --user alice --json > schedule.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY            Google Gemini API key (default provider)
  OPENAI_API_KEY            OpenAI API key (--provider openai)
  MEDISCHED_MODEL           Primary model, tried before the fallbacks
  MEDISCHED_LAYOUT_URL      Layout service endpoint
  MEDISCHED_LAYOUT_API_KEY  Layout service bearer token
"#;

/// Extract medicine reminder schedules from prescription scans.
#[derive(Parser, Debug)]
#[command(
    name = "medisched",
    version,
    about = "Extract medicine reminder schedules from prescription scans",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Prescription image or PDF; with --from-text a text file, or - for stdin.
    input: String,

    /// Owner of the created schedules.
    #[arg(short, long, env = "MEDISCHED_USER")]
    user: String,

    /// Extraction strategy.
    #[arg(long, env = "MEDISCHED_STRATEGY", value_enum, default_value = "model")]
    strategy: StrategyArg,

    /// Text-recognition engine.
    #[arg(long, env = "MEDISCHED_RECOGNIZER", value_enum, default_value = "tesseract")]
    recognizer: RecognizerArg,

    /// Treat INPUT as already-recognized text and skip recognition.
    #[arg(long, env = "MEDISCHED_FROM_TEXT")]
    from_text: bool,

    /// Primary model, tried before the fallback chain.
    #[arg(long, env = "MEDISCHED_MODEL")]
    model: Option<String>,

    /// Comma-separated fallback chain, replacing the default.
    #[arg(long, env = "MEDISCHED_FALLBACK_MODELS", value_delimiter = ',')]
    fallback_models: Vec<String>,

    /// LLM provider name understood by edgequake-llm.
    #[arg(long, env = "MEDISCHED_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Tesseract language code.
    #[arg(long, env = "MEDISCHED_OCR_LANG", default_value = "eng")]
    lang: String,

    /// Layout service endpoint (for --recognizer layout).
    #[arg(long, env = "MEDISCHED_LAYOUT_URL")]
    layout_url: Option<String>,

    /// Layout service bearer token.
    #[arg(long, env = "MEDISCHED_LAYOUT_API_KEY", hide_env_values = true)]
    layout_api_key: Option<String>,

    /// Path to a custom extraction prompt containing {text}.
    #[arg(long, env = "MEDISCHED_PROMPT")]
    prompt: Option<PathBuf>,

    /// Base backoff between fallback models in milliseconds.
    #[arg(long, env = "MEDISCHED_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds.
    #[arg(long, env = "MEDISCHED_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output the full PipelineOutput as JSON.
    #[arg(long, env = "MEDISCHED_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDISCHED_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDISCHED_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDISCHED_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Model,
    Rules,
}

impl From<StrategyArg> for ExtractionStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Model => ExtractionStrategy::Model,
            StrategyArg::Rules => ExtractionStrategy::Rules,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RecognizerArg {
    Tesseract,
    Layout,
    Vision,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; library INFO logs
    // would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )
    .await?;

    // ── Assemble pipeline ────────────────────────────────────────────────
    let store = Arc::new(MemoryStore::new());
    store
        .register_user(cli.user.clone())
        .context("Failed to register user")?;

    let mut pipeline = PrescriptionPipeline::new(config.clone(), store)
        .context("Failed to initialise extraction")?;
    if !cli.from_text {
        pipeline = pipeline.with_recognizer(build_recognizer(cli.recognizer, &config)?);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let result = if cli.from_text {
        let text = read_text_input(&cli.input)?;
        pipeline.process_text(&text, &cli.user).await
    } else {
        pipeline.process_file(&cli.input, &cli.user).await
    };
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let output = result.context("Prescription processing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_summary(&output, cli.quiet);
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .strategy(cli.strategy.into())
        .provider_name(&cli.provider)
        .ocr_language(&cli.lang)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout);

    if !cli.fallback_models.is_empty() {
        builder = builder.fallback_models(cli.fallback_models.iter().map(|m| m.trim().to_string()));
    }
    if let Some(ref model) = cli.model {
        builder = builder.primary_model(model);
    }
    if let Some(ref url) = cli.layout_url {
        builder = builder.layout_service_url(url);
    }
    if let Some(ref key) = cli.layout_api_key {
        builder = builder.layout_api_key(key);
    }
    if let Some(ref path) = cli.prompt {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_recognizer(kind: RecognizerArg, config: &PipelineConfig) -> Result<Arc<dyn TextRecognizer>> {
    let recognizer: Arc<dyn TextRecognizer> = match kind {
        RecognizerArg::Tesseract => Arc::new(TesseractRecognizer::from_config(config)),
        RecognizerArg::Layout => Arc::new(
            LayoutServiceRecognizer::from_config(config)
                .context("Failed to set up layout recognizer")?,
        ),
        RecognizerArg::Vision => Arc::new(
            VisionRecognizer::from_config(config).context("Failed to set up vision recognizer")?,
        ),
    };
    Ok(recognizer)
}

fn read_text_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))
    }
}

fn print_summary(output: &PipelineOutput, quiet: bool) {
    for (medicine, id) in output
        .medicines
        .iter()
        .filter(|m| skip_reason(m).is_none())
        .zip(&output.schedule_ids)
    {
        let timings: Vec<&str> = medicine.timings.iter().map(|t| t.as_str()).collect();
        println!(
            "{} {:<24} {:<12} {:<28} {}",
            green("✔"),
            bold(&medicine.medicine_name),
            medicine.dosage,
            medicine.frequency,
            timings.join(", ")
        );
        if !quiet {
            println!("  {}", dim(&format!("schedule {id}")));
        }
    }
    for skipped in &output.skipped {
        println!(
            "{} {:<24} {}",
            cyan("⚠"),
            skipped.medicine_name,
            dim(&skipped.reason.to_string())
        );
    }

    if quiet {
        return;
    }
    if let Some(ref warning) = output.extraction_warning {
        eprintln!("{} {}", red("✘"), warning);
    }
    let stats = &output.stats;
    let model = stats
        .model_used
        .as_deref()
        .map(|m| format!("  model {m} ({} attempts)", stats.model_attempts))
        .unwrap_or_default();
    eprintln!(
        "{}  {} schedules  {} strategy{}  {}ms",
        if output.schedule_ids.is_empty() {
            cyan("⚠")
        } else {
            green("✔")
        },
        output.schedule_ids.len(),
        stats.strategy,
        model,
        stats.total_ms
    );
}
