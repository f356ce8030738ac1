//! Text recognition: prescription image or document → raw text.
//!
//! The pipeline only relies on "file in, text out". Each engine sits behind
//! [`TextRecognizer`]. Any packaging an engine needs, such as zipping an
//! image for a service that only accepts documents, stays inside its
//! adapter.
//!
//! | Recognizer                  | Images | PDFs | Needs                       |
//! |-----------------------------|--------|------|-----------------------------|
//! | [`TesseractRecognizer`]     | yes    | no   | `tesseract` on `PATH`       |
//! | [`LayoutServiceRecognizer`] | yes    | yes  | service URL (+ bearer key)  |
//! | [`VisionRecognizer`]        | yes    | no   | an `edgequake-llm` provider |
//!
//! No retries happen at this layer. A failure aborts the run.

use crate::config::PipelineConfig;
use crate::error::{PrescriptionError, RecognitionError};
use crate::model::RecognizedText;
use crate::pipeline::encode::encode_image;
use crate::pipeline::input::{InputKind, ResolvedInput};
use crate::pipeline::llm::create_provider;
use crate::pipeline::postprocess::clean_recognized_text;
use crate::prompts::TRANSCRIPTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A text-recognition engine.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Short engine name for logs and stats.
    fn name(&self) -> &'static str;

    /// Recognize the text in the file at `path`.
    async fn recognize(&self, path: &Path, kind: InputKind) -> Result<String, RecognitionError>;
}

/// Run `recognizer` on a resolved input and clean the result.
pub async fn recognize_input(
    recognizer: &dyn TextRecognizer,
    input: &ResolvedInput,
) -> Result<RecognizedText, RecognitionError> {
    debug!(
        "Recognizing {} with {}",
        input.path().display(),
        recognizer.name()
    );
    let raw = recognizer.recognize(input.path(), input.kind()).await?;
    let text = clean_recognized_text(&raw);
    info!(
        "{} recognized {} chars ({} lines)",
        recognizer.name(),
        text.len(),
        text.lines().count()
    );
    Ok(text)
}

// ── Tesseract ────────────────────────────────────────────────────────────────

/// Local OCR through the `tesseract` command-line tool.
pub struct TesseractRecognizer {
    language: String,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            language: config.ocr_language.clone(),
            timeout: Duration::from_secs(config.recognition_timeout_secs),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, path: &Path, kind: InputKind) -> Result<String, RecognitionError> {
        if kind == InputKind::Document {
            return Err(RecognitionError::UnsupportedInput(
                "tesseract reads images only; use the layout or vision recognizer for PDFs".into(),
            ));
        }

        let mut command = tokio::process::Command::new("tesseract");
        command
            .arg(path)
            .arg("stdout")
            .args(["-l", self.language.as_str()])
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => Err(RecognitionError::Failed(format!(
                "tesseract timed out after {}s",
                self.timeout.as_secs()
            ))),
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(RecognitionError::Failed(format!("tesseract failed: {}", stderr.trim())))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RecognitionError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Ok(Err(e)) => Err(RecognitionError::Io(e)),
        }
    }
}

// ── Layout-aware service ─────────────────────────────────────────────────────

/// Remote layout-aware OCR service that accepts document uploads.
///
/// Images are wrapped in a single-entry zip archive before upload.
pub struct LayoutServiceRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl LayoutServiceRecognizer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, RecognitionError> {
        let endpoint = config.layout_service_url.clone().ok_or_else(|| {
            RecognitionError::BackendNotAvailable(
                "layout service URL not configured (set MEDISCHED_LAYOUT_URL)".into(),
            )
        })?;
        Self::new(
            endpoint,
            config.layout_api_key.clone(),
            Duration::from_secs(config.recognition_timeout_secs),
        )
    }
}

#[async_trait]
impl TextRecognizer for LayoutServiceRecognizer {
    fn name(&self) -> &'static str {
        "layout"
    }

    async fn recognize(&self, path: &Path, kind: InputKind) -> Result<String, RecognitionError> {
        // `_archive` keeps the temp dir alive until the upload finishes and
        // removes it on every return path below.
        let (_archive, upload_path, file_name, mime) = match kind {
            InputKind::Image(_) => {
                let archive = package_image(path)?;
                let upload_path = archive.path().to_path_buf();
                (Some(archive), upload_path, "prescription.zip", "application/zip")
            }
            InputKind::Document => (None, path.to_path_buf(), "prescription.pdf", kind.mime_type()),
        };

        let bytes = tokio::fs::read(&upload_path).await?;
        debug!("Uploading {} bytes to layout service as {}", bytes.len(), file_name);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RecognitionError::Failed(format!(
                "layout service returned {}: {}",
                status,
                body.trim()
            )));
        }
        parse_layout_response(&body)
    }
}

/// A zip archive in a private temp directory. Dropping it deletes both.
pub struct PackagedArchive {
    dir: TempDir,
    path: PathBuf,
}

impl PackagedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Wrap one image file in a single-entry zip archive.
pub fn package_image(image: &Path) -> Result<PackagedArchive, RecognitionError> {
    let dir = tempfile::Builder::new().prefix("medisched-").tempdir()?;
    let entry_name = image
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("prescription");
    let path = dir.path().join("prescription.zip");

    let bytes = std::fs::read(image)?;
    let mut zip = ZipWriter::new(std::fs::File::create(&path)?);
    zip.start_file(
        entry_name,
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    zip.write_all(&bytes)?;
    zip.finish()?;

    debug!("Packaged {} into {}", image.display(), path.display());
    Ok(PackagedArchive { dir, path })
}

#[derive(Debug, Deserialize)]
struct LayoutResponse {
    #[serde(default, alias = "text")]
    markdown: Option<String>,
    #[serde(default)]
    pages: Vec<LayoutPage>,
}

#[derive(Debug, Deserialize)]
struct LayoutPage {
    #[serde(default, alias = "text")]
    markdown: String,
}

/// Pull the text out of a layout service reply.
///
/// Accepts a top-level `markdown` (or `text`) field, or a `pages` list whose
/// entries carry one, joined with blank lines.
pub fn parse_layout_response(body: &str) -> Result<String, RecognitionError> {
    let reply: LayoutResponse = serde_json::from_str(body)
        .map_err(|e| RecognitionError::Failed(format!("unreadable layout service reply: {e}")))?;
    if let Some(text) = reply.markdown {
        return Ok(text);
    }
    if !reply.pages.is_empty() {
        return Ok(reply
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .collect::<Vec<_>>()
            .join("\n\n"));
    }
    Err(RecognitionError::Failed(
        "layout service reply carried no text".into(),
    ))
}

// ── Vision model ─────────────────────────────────────────────────────────────

/// Transcription through a vision-capable chat model.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(0.0),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            timeout: Duration::from_secs(config.recognition_timeout_secs),
        }
    }

    /// Use the head of the fallback chain as the vision model.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PrescriptionError> {
        let model = config.fallback_models.first().ok_or_else(|| {
            PrescriptionError::InvalidConfig("vision recognizer needs a model".into())
        })?;
        let provider = create_provider(&config.provider_name, model)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn recognize(&self, path: &Path, kind: InputKind) -> Result<String, RecognitionError> {
        if kind == InputKind::Document {
            return Err(RecognitionError::UnsupportedInput(
                "vision recognizer reads images only; use the layout recognizer for PDFs".into(),
            ));
        }

        let bytes = tokio::fs::read(path).await?;
        let image = encode_image(&bytes)
            .map_err(|e| RecognitionError::UnsupportedInput(format!("cannot encode image: {e}")))?;

        let messages = vec![
            ChatMessage::system(TRANSCRIPTION_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];

        match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
        {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(e)) => Err(RecognitionError::Failed(format!("vision model: {}", e))),
            Err(_) => Err(RecognitionError::Failed(format!(
                "vision model timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::spool_bytes;
    use image::ImageFormat;
    use std::io::Read;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct FixedRecognizer(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedRecognizer {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn recognize(&self, _: &Path, _: InputKind) -> Result<String, RecognitionError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn package_image_single_entry_and_cleanup() {
        let mut image = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        image.write_all(PNG_MAGIC).unwrap();

        let archive = package_image(image.path()).unwrap();
        let archive_path = archive.path().to_path_buf();
        let dir_path = archive.dir().to_path_buf();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_index(0).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, PNG_MAGIC);
        drop(entry);
        drop(zip);

        drop(archive);
        assert!(!archive_path.exists());
        assert!(!dir_path.exists());
    }

    #[test]
    fn package_missing_image_fails_without_leftovers() {
        let err = package_image(Path::new("/no/such/image.png")).err().unwrap();
        assert!(matches!(err, RecognitionError::Io(_)));
    }

    #[test]
    fn layout_response_shapes() {
        assert_eq!(
            parse_layout_response(r#"{"markdown": "Metformin 500mg"}"#).unwrap(),
            "Metformin 500mg"
        );
        assert_eq!(parse_layout_response(r#"{"text": "Zinc 50mg"}"#).unwrap(), "Zinc 50mg");
        assert_eq!(
            parse_layout_response(r#"{"pages": [{"markdown": "a"}, {"markdown": "b"}]}"#).unwrap(),
            "a\n\nb"
        );
        assert!(parse_layout_response("{}").is_err());
        assert!(parse_layout_response("<html>").is_err());
    }

    #[test]
    fn layout_requires_endpoint() {
        let config = PipelineConfig::default();
        let err = LayoutServiceRecognizer::from_config(&config).err().unwrap();
        assert!(matches!(err, RecognitionError::BackendNotAvailable(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn tesseract_rejects_documents() {
        let rec = TesseractRecognizer::new("eng");
        let err = rec
            .recognize(Path::new("rx.pdf"), InputKind::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::UnsupportedInput(_)));
    }

    #[tokio::test]
    async fn recognized_text_is_cleaned() {
        let input = spool_bytes(PNG_MAGIC).unwrap();
        assert_eq!(input.kind(), InputKind::Image(ImageFormat::Png));
        let rec = FixedRecognizer("Rx\r\n Metformin 500mg  \r\n\n\n\n\nZinc 50mg\n");
        let text = recognize_input(&rec, &input).await.unwrap();
        assert_eq!(text, "Rx\n Metformin 500mg\n\n\nZinc 50mg");
    }
}
