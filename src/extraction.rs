//! Turn uploaded bytes into plain text before they reach the document store.

use std::path::Path;
use thiserror::Error;

/// Failures while extracting text from an upload.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The payload is binary data in a format this extractor does not understand.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// Lowercased extension of the upload, or an empty string when it has none.
        extension: String,
    },
    /// The payload claimed to be a PDF but could not be parsed.
    #[error("failed to extract text from PDF: {0}")]
    Pdf(String),
}

/// Converts raw upload bytes to text. Implementations are synchronous; callers on an async
/// runtime should run them via `spawn_blocking`.
pub trait TextExtractor: Send + Sync {
    /// Decoded text for `bytes`, using `filename` to pick a format.
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractionError>;
}

/// PDF via `pdf-extract`; everything textual decoded as UTF-8 with invalid bytes dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractionError> {
        let extension = extension_of(filename);
        match extension.as_str() {
            "pdf" => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|error| ExtractionError::Pdf(error.to_string())),
            "txt" | "md" | "text" => Ok(decode_utf8_ignoring_invalid(bytes)),
            _ if bytes.contains(&0) => Err(ExtractionError::UnsupportedFormat { extension }),
            _ => Ok(decode_utf8_ignoring_invalid(bytes)),
        }
    }
}

fn decode_utf8_ignoring_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Trim every line and collapse runs of blank lines into a single paragraph break.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut pending_break = false;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            pending_break = !cleaned.is_empty();
            continue;
        }
        if !cleaned.is_empty() {
            cleaned.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        cleaned.push_str(line);
        pending_break = false;
    }

    cleaned
}
