//! Per-conversation directory tree.
//!
//! ```text
//! {base}/{id}/input/*.txt          normalized source documents
//! {base}/{id}/output/*.parquet     engine artifacts
//! {base}/{id}/cache/               engine-private memoization
//! {base}/{id}/settings.yaml        generated engine configuration
//! ```
//!
//! Accessors that hand out a directory create it (and its parents) on every call. Listing and
//! existence probes never create anything, so status reads observe the tree as it is.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

/// Subdirectory holding normalized documents.
pub const INPUT_DIR: &str = "input";
/// Subdirectory holding engine artifacts.
pub const OUTPUT_DIR: &str = "output";
/// Subdirectory reserved for the engine's cache.
pub const CACHE_DIR: &str = "cache";
/// Engine configuration file written at the workspace root.
pub const SETTINGS_FILE: &str = "settings.yaml";
/// Extension of documents the engine ingests.
pub const TEXT_EXTENSION: &str = "txt";
/// Extension of artifact tables produced by a build.
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Filesystem failures raised while preparing or scanning a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory we attempted to create.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A directory could not be enumerated.
    #[error("failed to list directory {path}: {source}")]
    ListDir {
        /// Directory we attempted to scan.
        path: PathBuf,
        /// Underlying traversal error.
        #[source]
        source: walkdir::Error,
    },
}

/// Owns the per-conversation directory layout under a configured base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Manage workspaces rooted at `base_dir`. Nothing is created until a directory is requested.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory that holds every conversation workspace.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Workspace root for `id`, without touching the filesystem.
    pub fn root(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(id.to_string())
    }

    /// Workspace root for `id`, created if missing.
    pub fn workspace_dir(&self, id: Uuid) -> Result<PathBuf, WorkspaceError> {
        ensure_dir(self.root(id))
    }

    /// Input directory for `id`, created if missing.
    pub fn input_dir(&self, id: Uuid) -> Result<PathBuf, WorkspaceError> {
        ensure_dir(self.root(id).join(INPUT_DIR))
    }

    /// Output directory for `id`, created if missing.
    pub fn output_dir(&self, id: Uuid) -> Result<PathBuf, WorkspaceError> {
        ensure_dir(self.root(id).join(OUTPUT_DIR))
    }

    /// Cache directory for `id`, created if missing.
    pub fn cache_dir(&self, id: Uuid) -> Result<PathBuf, WorkspaceError> {
        ensure_dir(self.root(id).join(CACHE_DIR))
    }

    /// Location of the generated engine configuration. The root is created if missing.
    pub fn settings_path(&self, id: Uuid) -> Result<PathBuf, WorkspaceError> {
        Ok(self.workspace_dir(id)?.join(SETTINGS_FILE))
    }

    /// Whether the output directory exists. Says nothing about artifact validity.
    pub fn has_output(&self, id: Uuid) -> bool {
        self.root(id).join(OUTPUT_DIR).is_dir()
    }

    /// Text documents in the input directory, sorted by file name.
    pub fn text_files(&self, id: Uuid) -> Result<Vec<PathBuf>, WorkspaceError> {
        files_with_extension(&self.root(id).join(INPUT_DIR), TEXT_EXTENSION)
    }

    /// Artifact tables in the output directory, sorted by file name.
    pub fn artifact_files(&self, id: Uuid) -> Result<Vec<PathBuf>, WorkspaceError> {
        files_with_extension(&self.root(id).join(OUTPUT_DIR), ARTIFACT_EXTENSION)
    }

    /// Remove the whole workspace for `id`.
    ///
    /// Returns `true` only when a workspace existed and was removed. Removal errors are logged
    /// and reported as `false`.
    pub fn delete(&self, id: Uuid) -> bool {
        let root = self.root(id);
        if !root.exists() {
            tracing::debug!(conversation_id = %id, "No workspace to delete");
            return false;
        }

        match fs::remove_dir_all(&root) {
            Ok(()) => {
                tracing::info!(conversation_id = %id, "Deleted conversation workspace");
                true
            }
            Err(error) => {
                tracing::error!(
                    conversation_id = %id,
                    path = %root.display(),
                    error = %error,
                    "Failed to delete conversation workspace"
                );
                false
            }
        }
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, WorkspaceError> {
    fs::create_dir_all(&path).map_err(|source| WorkspaceError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Regular files directly under `dir` whose extension is `extension`. A missing directory
/// yields an empty list.
fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, WorkspaceError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| WorkspaceError::ListDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let matches = entry.file_type().is_file()
            && entry.path().extension().and_then(|ext| ext.to_str()) == Some(extension);
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
