//! Input resolution: normalise an uploaded file or byte buffer to a local,
//! classified file.
//!
//! Recognition engines want a file-system path. Byte uploads are spilled to
//! a [`NamedTempFile`] owned by [`ResolvedInput`], so the file is removed
//! when the run ends, whichever stage it ends in. The first bytes are
//! sniffed to decide between an image and a document before any engine is
//! called, so callers get a typed error instead of an engine crash.

use crate::error::{PrescriptionError, RecognitionError};
use image::ImageFormat;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Bytes read from the head of the file for format sniffing.
const SNIFF_LEN: u64 = 64;

/// Shape of a prescription upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A photograph or scan (PNG, JPEG, …).
    Image(ImageFormat),
    /// A PDF document.
    Document,
}

impl InputKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            InputKind::Image(format) => format.to_mime_type(),
            InputKind::Document => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            InputKind::Image(format) => format.extensions_str().first().copied().unwrap_or("img"),
            InputKind::Document => "pdf",
        }
    }
}

/// The resolved input: either the caller's file or a spooled temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { path: PathBuf, kind: InputKind },
    /// Input arrived as bytes; the temp file lives as long as this value.
    Spooled { file: NamedTempFile, kind: InputKind },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Spooled { file, .. } => file.path(),
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            ResolvedInput::Local { kind, .. } | ResolvedInput::Spooled { kind, .. } => *kind,
        }
    }
}

/// Classify a file from its leading bytes.
pub fn detect_kind(head: &[u8]) -> Option<InputKind> {
    if head.starts_with(b"%PDF") {
        return Some(InputKind::Document);
    }
    image::guess_format(head).ok().map(InputKind::Image)
}

/// Resolve a local file path, validating existence, permissions and format.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<ResolvedInput, PrescriptionError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(PrescriptionError::FileNotFound { path });
    }

    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    match std::fs::File::open(&path) {
        Ok(f) => {
            f.take(SNIFF_LEN)
                .read_to_end(&mut head)
                .map_err(RecognitionError::Io)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PrescriptionError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(PrescriptionError::FileNotFound { path });
        }
    }

    let kind = detect_kind(&head).ok_or_else(|| {
        RecognitionError::UnsupportedInput(format!(
            "'{}' is neither an image nor a PDF document",
            path.display()
        ))
    })?;

    debug!("Resolved local input {} as {:?}", path.display(), kind);
    Ok(ResolvedInput::Local { path, kind })
}

/// Spill uploaded bytes to a temp file, keeping a recognisable extension.
pub fn spool_bytes(bytes: &[u8]) -> Result<ResolvedInput, PrescriptionError> {
    let kind = detect_kind(bytes).ok_or_else(|| {
        RecognitionError::UnsupportedInput("upload is neither an image nor a PDF document".into())
    })?;

    let mut file = tempfile::Builder::new()
        .prefix("prescription-")
        .suffix(&format!(".{}", kind.extension()))
        .tempfile()
        .map_err(|e| PrescriptionError::Internal(format!("tempfile: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| PrescriptionError::Internal(format!("tempfile write: {e}")))?;

    debug!("Spooled {} upload bytes to {}", bytes.len(), file.path().display());
    Ok(ResolvedInput::Spooled { file, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(b"%PDF-1.7\n"), Some(InputKind::Document));
        assert_eq!(detect_kind(PNG_MAGIC), Some(InputKind::Image(ImageFormat::Png)));
        assert_eq!(detect_kind(JPEG_MAGIC), Some(InputKind::Image(ImageFormat::Jpeg)));
        assert_eq!(detect_kind(b"Metformin 500mg"), None);
        assert_eq!(detect_kind(b""), None);
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(InputKind::Document.mime_type(), "application/pdf");
        assert_eq!(InputKind::Image(ImageFormat::Png).mime_type(), "image/png");
        assert_eq!(InputKind::Image(ImageFormat::Png).extension(), "png");
    }

    #[test]
    fn test_missing_file() {
        let err = resolve_local("/definitely/not/a/prescription.png")
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, PrescriptionError::FileNotFound { .. }));
    }

    #[test]
    fn test_unsupported_local_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"plain text, not an image").unwrap();
        let err = resolve_local(f.path()).err().expect("text file must fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_spooled_file_removed_on_drop() {
        let resolved = spool_bytes(PNG_MAGIC).unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        drop(resolved);
        assert!(!path.exists());
    }
}
