//! Live workspace statistics for health checks and UI display.

use crate::documents::read_text;
use crate::workspace::{WorkspaceError, WorkspaceManager};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of a conversation's knowledge base, computed from the filesystem on every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// At least one artifact table exists.
    pub has_index: bool,
    /// At least one text document exists.
    pub has_documents: bool,
    /// Number of text documents.
    pub document_count: usize,
    /// Characters across readable documents; unreadable files contribute nothing.
    pub total_characters: usize,
    /// Number of artifact tables.
    pub artifact_count: usize,
}

/// Aggregates document and artifact counts without caching.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    workspace: Arc<WorkspaceManager>,
}

impl StatusReporter {
    /// Create a reporter over `workspace`.
    pub fn new(workspace: Arc<WorkspaceManager>) -> Self {
        Self { workspace }
    }

    /// Current statistics for conversation `id`.
    pub fn stats(&self, id: Uuid) -> Result<IndexStats, WorkspaceError> {
        let documents = self.workspace.text_files(id)?;
        let artifact_count = self.workspace.artifact_files(id)?.len();

        let total_characters = documents
            .iter()
            .filter_map(|path| read_text(path).ok())
            .map(|content| content.chars().count())
            .sum();

        Ok(IndexStats {
            has_index: artifact_count > 0,
            has_documents: !documents.is_empty(),
            document_count: documents.len(),
            total_characters,
            artifact_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn empty_workspace_reports_nothing() {
        let temp = TempDir::new().expect("tempdir");
        let reporter = StatusReporter::new(Arc::new(WorkspaceManager::new(temp.path())));

        assert_eq!(
            reporter.stats(Uuid::new_v4()).expect("stats"),
            IndexStats::default()
        );
    }

    #[test]
    fn counts_documents_characters_and_artifacts() {
        let temp = TempDir::new().expect("tempdir");
        let workspace = Arc::new(WorkspaceManager::new(temp.path()));
        let id = Uuid::new_v4();
        let input = workspace.input_dir(id).expect("input");
        let output = workspace.output_dir(id).expect("output");
        fs::write(input.join("a.txt"), "12345\n").expect("write");
        fs::write(input.join("b.txt"), "abc\n").expect("write");
        fs::write(input.join("bad.txt"), [0xff, 0xfe]).expect("write");
        fs::write(output.join("create_final_entities.parquet"), b"PAR1").expect("write");
        fs::write(output.join("stats.json"), b"{}").expect("write");

        let stats = StatusReporter::new(workspace).stats(id).expect("stats");
        assert_eq!(
            stats,
            IndexStats {
                has_index: true,
                has_documents: true,
                document_count: 3,
                total_characters: 10,
                artifact_count: 1,
            }
        );
    }

    #[test]
    fn output_directory_without_artifacts_is_not_an_index() {
        let temp = TempDir::new().expect("tempdir");
        let workspace = Arc::new(WorkspaceManager::new(temp.path()));
        let id = Uuid::new_v4();
        workspace.output_dir(id).expect("output");

        let stats = StatusReporter::new(workspace).stats(id).expect("stats");
        assert!(!stats.has_index);
        assert_eq!(stats.artifact_count, 0);
    }
}
