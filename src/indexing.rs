//! Index builds: validate inputs, write engine settings, run `graphrag index`, interpret the
//! result.
//!
//! Checks run strictly in this order and the first failure ends the call:
//!
//! 1. at least one `.txt` document exists,
//! 2. every document reads as UTF-8,
//! 3. total characters reach the volume floor (below the soft threshold only warns),
//! 4. an API credential is configured,
//! 5. `settings.yaml` is written,
//! 6. the engine runs and exits 0.
//!
//! A successful build replaces the artifact set in place. Nothing is retried.

use crate::config::Config;
use crate::documents::{DocumentStore, file_name};
use crate::engine::{Credentials, EngineError, EngineInvocation, EngineRunner};
use crate::engine_config::{EngineConfigEmitter, EngineConfigError};
use crate::workspace::{WorkspaceError, WorkspaceManager};
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

const EMPTY_DATAFRAME_SIGNATURE: &str = "Empty DataFrame";
const TEXT_UNIT_STAGE_SIGNATURE: &str = "create_base_text_units";

/// Likely cause of a failed build, recognized from the engine's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    /// The engine produced an empty table, usually because documents are too short or lack
    /// paragraph structure.
    ContentTooShort,
    /// The text-unit creation stage failed, usually a chunking configuration problem.
    ChunkingMisconfigured,
}

impl FailureHint {
    /// Hints whose signatures appear in the captured output.
    pub fn detect(stdout: &str, stderr: &str) -> Vec<Self> {
        let mentions = |needle: &str| stdout.contains(needle) || stderr.contains(needle);
        let mut hints = Vec::new();
        if mentions(EMPTY_DATAFRAME_SIGNATURE) {
            hints.push(Self::ContentTooShort);
        }
        if mentions(TEXT_UNIT_STAGE_SIGNATURE) {
            hints.push(Self::ChunkingMisconfigured);
        }
        hints
    }

    /// Troubleshooting suggestions shown to the operator.
    pub fn advice(self) -> &'static [&'static str] {
        match self {
            Self::ContentTooShort => &[
                "Content is too short or poorly formatted",
                "Try documents with at least 200-300 characters",
                "Ensure proper paragraph breaks (double newlines)",
            ],
            Self::ChunkingMisconfigured => &[
                "Reduce the chunk size in settings",
                "Add more content to the documents",
                "Ensure documents are UTF-8 encoded",
            ],
        }
    }
}

/// Why a build did not produce a trustworthy artifact set.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The input directory holds no `.txt` files.
    #[error("no documents to index")]
    NoDocuments,
    /// A document could not be read as UTF-8 text.
    #[error("failed to read {file}: {source}")]
    UnreadableDocument {
        /// File that failed to read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Total content is below the indexing floor.
    #[error("insufficient content for indexing: {total} characters (minimum {floor})")]
    InsufficientContent {
        /// Characters across all documents.
        total: usize,
        /// Configured floor.
        floor: usize,
    },
    /// No API credential is configured.
    #[error("OPENAI_API_KEY not set")]
    MissingCredential,
    /// Workspace directories could not be prepared or scanned.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The engine settings could not be rendered or written.
    #[error(transparent)]
    ConfigWrite(#[from] EngineConfigError),
    /// The engine executable could not be found.
    #[error("'{program}' CLI not found in PATH; install with `pip install graphrag`")]
    BinaryMissing {
        /// Program that could not be resolved.
        program: String,
    },
    /// The engine ran and exited unsuccessfully.
    #[error("indexing process exited with status {exit_code:?}")]
    ProcessFailed {
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
        /// Likely causes recognized in the output.
        hints: Vec<FailureHint>,
    },
    /// The engine could not be started or awaited.
    #[error(transparent)]
    Engine(EngineError),
}

/// Summary of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Documents fed to the engine.
    pub document_count: usize,
    /// Characters across those documents.
    pub total_characters: usize,
    /// Whether the low-volume warning fired.
    pub low_volume: bool,
    /// Artifact tables found after the engine exited (zero is still a success).
    pub artifact_count: usize,
    /// SHA-256 of the settings document used for this build.
    pub settings_digest: String,
    /// RFC 3339 completion time.
    pub completed_at: String,
}

struct ValidatedInputs {
    document_count: usize,
    total_characters: usize,
    low_volume: bool,
}

/// Drives `graphrag index` for one conversation at a time.
#[derive(Clone)]
pub struct IndexBuilder {
    config: Arc<Config>,
    workspace: Arc<WorkspaceManager>,
    documents: DocumentStore,
    emitter: EngineConfigEmitter,
    runner: Arc<dyn EngineRunner>,
}

impl IndexBuilder {
    /// Create a builder. `documents` is only used for debug dumps.
    pub fn new(
        config: Arc<Config>,
        workspace: Arc<WorkspaceManager>,
        documents: DocumentStore,
        emitter: EngineConfigEmitter,
        runner: Arc<dyn EngineRunner>,
    ) -> Self {
        Self {
            config,
            workspace,
            documents,
            emitter,
            runner,
        }
    }

    /// Build the graph index for `id`.
    ///
    /// `debug` dumps the input files and logs full error detail; it never changes the outcome.
    /// Concurrent builds for the same conversation race on `settings.yaml` and `output/`;
    /// [`crate::service::KnowledgeBaseService`] serializes them.
    pub async fn build(&self, id: Uuid, debug: bool) -> Result<BuildReport, BuildError> {
        let root = self.workspace.workspace_dir(id)?;
        self.workspace.input_dir(id)?;
        self.workspace.output_dir(id)?;
        self.workspace.cache_dir(id)?;

        let inputs = self.validate_inputs(id)?;
        if debug {
            self.documents.debug_dump(id);
        }

        let credentials =
            Credentials::from_config(&self.config).ok_or(BuildError::MissingCredential)?;
        let written = self.emitter.write(id)?;

        if let Some(url) = credentials.base_url() {
            tracing::info!(base_url = url, "Using custom OpenAI base URL");
        }
        tracing::info!(
            conversation_id = %id,
            root = %root.display(),
            model = %self.config.openai_model,
            embedding_model = %self.config.openai_embedding_model,
            "Starting graph indexing"
        );

        let invocation = EngineInvocation::index(&self.config.graphrag_binary, &root, &credentials);
        let output = self.runner.run(invocation).await.map_err(|error| match error {
            EngineError::BinaryMissing { program } => BuildError::BinaryMissing { program },
            other => BuildError::Engine(other),
        })?;

        if !output.success() {
            let hints = FailureHint::detect(&output.stdout, &output.stderr);
            return Err(BuildError::ProcessFailed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                hints,
            });
        }

        let artifact_count = match self.workspace.artifact_files(id) {
            Ok(files) => files.len(),
            Err(error) => {
                tracing::warn!(conversation_id = %id, error = %error, "Cannot count artifacts");
                0
            }
        };
        tracing::info!(conversation_id = %id, artifacts = artifact_count, "Graph indexing completed");

        Ok(BuildReport {
            document_count: inputs.document_count,
            total_characters: inputs.total_characters,
            low_volume: inputs.low_volume,
            artifact_count,
            settings_digest: written.digest,
            completed_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        })
    }

    fn validate_inputs(&self, id: Uuid) -> Result<ValidatedInputs, BuildError> {
        let files = self.workspace.text_files(id)?;
        if files.is_empty() {
            return Err(BuildError::NoDocuments);
        }

        tracing::info!(conversation_id = %id, files = files.len(), "Validating input files");
        let mut total_characters = 0;
        for path in &files {
            let content =
                fs::read_to_string(path).map_err(|source| BuildError::UnreadableDocument {
                    file: file_name(path),
                    source,
                })?;
            let characters = content.chars().count();
            tracing::info!(file = %file_name(path), characters, "Input file");
            total_characters += characters;
        }
        tracing::info!(conversation_id = %id, total_characters, "Total input volume");

        let policy = &self.config.policy;
        if total_characters < policy.min_total_chars {
            return Err(BuildError::InsufficientContent {
                total: total_characters,
                floor: policy.min_total_chars,
            });
        }

        let low_volume = total_characters < policy.low_volume_chars;
        if low_volume {
            tracing::warn!(
                conversation_id = %id,
                total_characters,
                "Low content volume may produce limited results"
            );
        }

        Ok(ValidatedInputs {
            document_count: files.len(),
            total_characters,
            low_volume,
        })
    }
}

/// Log a build failure the way an operator needs to see it.
pub fn log_build_failure(id: Uuid, error: &BuildError, debug: bool) {
    match error {
        BuildError::ProcessFailed {
            exit_code,
            stdout,
            stderr,
            hints,
        } => {
            tracing::error!(conversation_id = %id, exit_code = ?exit_code, "Graph indexing failed");
            if !stderr.is_empty() {
                tracing::error!(conversation_id = %id, "STDERR:\n{stderr}");
            }
            if !stdout.is_empty() {
                tracing::error!(conversation_id = %id, "STDOUT:\n{stdout}");
            }
            for hint in hints {
                tracing::warn!(conversation_id = %id, hint = ?hint, advice = ?hint.advice(), "Troubleshooting tip");
            }
        }
        BuildError::InsufficientContent { .. } | BuildError::NoDocuments => {
            tracing::warn!(conversation_id = %id, error = %error, "Index build skipped");
        }
        other => {
            tracing::error!(conversation_id = %id, error = %other, "Index build failed");
            if debug {
                tracing::error!(conversation_id = %id, detail = ?other, "Index build error detail");
            }
        }
    }
}
