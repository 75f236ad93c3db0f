//! Document normalization and persistence into a conversation's `input` directory.
//!
//! The file on disk is the only record of a document: listings rescan the directory every time.
//!
//! Two deliberate approximations live here:
//!
//! - Unbroken documents get a paragraph break after every `". "`, which also splits
//!   abbreviations and decimals. The engine's chunker needs blank-line paragraphs more than it
//!   needs accurate sentence boundaries.
//! - Short documents are accepted; the size check only warns.

use crate::config::ContentPolicy;
use crate::workspace::{TEXT_EXTENSION, WorkspaceError, WorkspaceManager};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const PARAGRAPH_BREAK: &str = "\n\n";
const DEBUG_PREVIEW_CHARS: usize = 300;
const FALLBACK_STEM: &str = "document";

/// Errors raised while saving or listing documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The input directory could not be prepared or scanned.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// A normalized document could not be written.
    #[error("failed to write document {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A stored document could not be read back as UTF-8 text.
    #[error("failed to read document {path}: {source}")]
    Read {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A stored document as seen by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    /// Normalized file name (always ends in `.txt`).
    pub filename: String,
    /// Character count of the stored text.
    pub characters: usize,
}

/// Saves and enumerates normalized documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    workspace: Arc<WorkspaceManager>,
    policy: ContentPolicy,
}

impl DocumentStore {
    /// Create a store writing into `workspace` with the thresholds from `policy`.
    pub fn new(workspace: Arc<WorkspaceManager>, policy: ContentPolicy) -> Self {
        Self { workspace, policy }
    }

    /// Normalize `content` and write it as a text file in the conversation's input directory.
    ///
    /// An existing document with the same normalized name is overwritten.
    pub fn save(&self, id: Uuid, filename: &str, content: &str) -> Result<PathBuf, DocumentError> {
        let input_dir = self.workspace.input_dir(id)?;
        let filename = normalize_filename(filename);

        let trimmed_chars = content.trim().chars().count();
        if trimmed_chars < self.policy.min_document_chars {
            tracing::warn!(
                conversation_id = %id,
                file = %filename,
                characters = trimmed_chars,
                recommended = self.policy.min_document_chars,
                "Document is shorter than the recommended minimum"
            );
        }

        let text = normalize_content(content, &self.policy);
        let path = input_dir.join(&filename);
        fs::write(&path, &text).map_err(|source| DocumentError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            conversation_id = %id,
            file = %filename,
            characters = text.chars().count(),
            "Saved document"
        );
        Ok(path)
    }

    /// Enumerate stored documents with their character counts.
    pub fn list(&self, id: Uuid) -> Result<Vec<DocumentInfo>, DocumentError> {
        self.workspace
            .text_files(id)?
            .into_iter()
            .map(|path| {
                let content = read_text(&path)?;
                Ok(DocumentInfo {
                    filename: file_name(&path),
                    characters: content.chars().count(),
                })
            })
            .collect()
    }

    /// Log size, line and paragraph statistics plus a short preview of every input file.
    pub fn debug_dump(&self, id: Uuid) {
        let files = match self.workspace.text_files(id) {
            Ok(files) => files,
            Err(error) => {
                tracing::warn!(conversation_id = %id, error = %error, "Cannot list input files");
                return;
            }
        };

        if files.is_empty() {
            tracing::info!(conversation_id = %id, "No .txt files found in input directory");
            return;
        }

        for path in files {
            let name = file_name(&path);
            match read_text(&path) {
                Ok(content) => {
                    let preview: String = content.chars().take(DEBUG_PREVIEW_CHARS).collect();
                    tracing::info!(
                        conversation_id = %id,
                        file = %name,
                        characters = content.chars().count(),
                        newlines = content.matches('\n').count(),
                        paragraph_breaks = content.matches(PARAGRAPH_BREAK).count(),
                        truncated = content.chars().count() > DEBUG_PREVIEW_CHARS,
                        preview = %preview,
                        "Input file"
                    );
                }
                Err(error) => {
                    tracing::warn!(conversation_id = %id, file = %name, error = %error, "Error reading file");
                }
            }
        }
    }
}

/// Force a plain-text file name.
///
/// Names already ending in `.txt` are kept; any other extension is replaced (not appended) so the
/// stem survives. Directory components are dropped so a name can never escape `input/`.
pub fn normalize_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(".txt") {
        return name;
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    format!("{stem}.{TEXT_EXTENSION}")
}

/// Canonical on-disk form of a document body.
///
/// Trims surrounding whitespace, synthesizes paragraph breaks for long unbroken text, and
/// guarantees a trailing newline.
pub fn normalize_content(content: &str, policy: &ContentPolicy) -> String {
    let mut text = content.trim().to_string();

    if !text.contains(PARAGRAPH_BREAK) && text.chars().count() > policy.paragraph_synthesis_chars {
        text = text.replace(". ", ".\n\n");
    }

    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

pub(crate) fn read_text(path: &Path) -> Result<String, DocumentError> {
    fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
