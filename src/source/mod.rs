//! Image sources
//!
//! Normalizes a local file or a fetched URL into one in-memory [`ImageSource`]

mod fetch;

use std::path::Path;
use std::sync::Arc;

use base64::Engine;

use crate::{Error, Result};

pub use fetch::{DEFAULT_URL_FILENAME, ImageFetcher, MAX_REDIRECTS, is_blocked_ip};

/// Image types the uploader accepts
pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// A loaded image: raw bytes, MIME type, and a displayable preview
///
/// Immutable once created; replaced wholesale by the next load.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageSource {
    bytes: Vec<u8>,
    mime_type: String,
    filename: String,
    preview: Arc<str>,
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSource")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl ImageSource {
    /// Build a source from bytes with a declared MIME type
    ///
    /// # Errors
    ///
    /// Returns `NotAnImage` if `mime_type` is not an `image/*` type
    pub fn from_bytes(bytes: Vec<u8>, mime_type: &str, filename: impl Into<String>) -> Result<Self> {
        let mime_type = essence(mime_type);
        if !mime_type.starts_with("image/") {
            return Err(Error::NotAnImage(format!("content type {mime_type}")));
        }

        let preview = format!(
            "data:{mime_type};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        Ok(Self {
            bytes,
            mime_type,
            filename: filename.into(),
            preview: preview.into(),
        })
    }

    /// Raw image bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type (parameters stripped)
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `data:` URL suitable for direct display
    #[must_use]
    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// Shared handle to the preview, cloned without copying the text
    #[must_use]
    pub fn shared_preview(&self) -> Arc<str> {
        Arc::clone(&self.preview)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Load an image from a local file
///
/// The type is taken from the file's magic bytes, falling back to its
/// extension. Only PNG, JPEG and WEBP are accepted.
///
/// # Errors
///
/// Returns `Read` if the file cannot be read, `NotAnImage` if the type is not accepted
pub async fn load_from_file(path: &Path) -> Result<ImageSource> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;

    let mime_type = sniff_mime(&bytes)
        .or_else(|| mime_from_extension(path))
        .ok_or_else(|| Error::NotAnImage(path.display().to_string()))?;

    let filename = path
        .file_name()
        .map_or_else(|| "image".to_string(), |n| n.to_string_lossy().into_owned());

    tracing::debug!(path = %path.display(), mime_type, len = bytes.len(), "loaded image file");

    ImageSource::from_bytes(bytes, mime_type, filename)
}

/// Detect an accepted image type from magic bytes
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Map an accepted file extension to its MIME type
fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Strip parameters from a content type (`image/png; q=1` -> `image/png`)
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
