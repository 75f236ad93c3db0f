//! Graph queries against a built artifact set.
//!
//! [`QueryRouter::query`] has a uniform "answer or `None`" contract so callers can fall back to
//! [`crate::fallback`] without inspecting errors. [`QueryRouter::run`] exposes the typed failure
//! for callers that want it.

use crate::config::Config;
use crate::engine::{Credentials, EngineError, EngineInvocation, EngineRunner};
use crate::workspace::{SETTINGS_FILE, WorkspaceManager};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const QUERY_PREVIEW_CHARS: usize = 100;

/// Retrieval strategy exposed by the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Entity- and relationship-scoped retrieval.
    #[default]
    Local,
    /// Corpus-wide, community-summary-scoped retrieval.
    Global,
}

impl QueryMode {
    /// Wire name passed to `--method`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Global => "global",
        }
    }

    /// Lenient parse: anything other than `local` or `global` becomes `local` with a warning.
    pub fn coerce(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|()| {
            tracing::warn!(mode = raw, "Invalid query mode; using 'local'");
            Self::Local
        })
    }
}

impl std::str::FromStr for QueryMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            _ => Err(()),
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a graph query produced no answer.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No output directory exists for the conversation.
    #[error("no graph index found; build the index first")]
    IndexAbsent,
    /// No API credential is configured.
    #[error("OPENAI_API_KEY not set")]
    MissingCredential,
    /// The engine executable could not be found.
    #[error("'{program}' CLI not found in PATH")]
    BinaryMissing {
        /// Program that could not be resolved.
        program: String,
    },
    /// The engine exited unsuccessfully.
    #[error("query process exited with status {exit_code:?}")]
    ProcessFailed {
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Trimmed standard output.
        stdout: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// The engine succeeded but printed nothing.
    #[error("query returned an empty response")]
    EmptyResponse,
    /// Any other failure to run the engine or prepare the workspace.
    #[error("query could not be run: {0}")]
    Unexpected(String),
}

/// Invokes the engine's `query` subcommand for a conversation.
#[derive(Clone)]
pub struct QueryRouter {
    config: Arc<Config>,
    workspace: Arc<WorkspaceManager>,
    runner: Arc<dyn EngineRunner>,
}

impl QueryRouter {
    /// Create a router using `runner` to execute the engine.
    pub fn new(
        config: Arc<Config>,
        workspace: Arc<WorkspaceManager>,
        runner: Arc<dyn EngineRunner>,
    ) -> Self {
        Self {
            config,
            workspace,
            runner,
        }
    }

    /// Answer `text` from the conversation's graph, or `None` on any failure.
    pub async fn query(&self, id: Uuid, text: &str, mode: &str, debug: bool) -> Option<String> {
        match self.run(id, text, mode, debug).await {
            Ok(answer) => Some(answer),
            Err(QueryError::IndexAbsent) => {
                tracing::info!(conversation_id = %id, "No graph index found; build the index first");
                None
            }
            Err(QueryError::ProcessFailed {
                exit_code,
                stdout,
                stderr,
            }) => {
                tracing::error!(
                    conversation_id = %id,
                    exit_code = ?exit_code,
                    stderr = %stderr,
                    stdout = %stdout,
                    "Graph query failed"
                );
                None
            }
            Err(error @ QueryError::EmptyResponse) => {
                tracing::warn!(conversation_id = %id, "{error}");
                None
            }
            Err(error) => {
                tracing::error!(conversation_id = %id, error = %error, "Graph query failed");
                None
            }
        }
    }

    /// Answer `text` from the conversation's graph, returning the typed failure.
    pub async fn run(
        &self,
        id: Uuid,
        text: &str,
        mode: &str,
        debug: bool,
    ) -> Result<String, QueryError> {
        if !self.workspace.has_output(id) {
            return Err(QueryError::IndexAbsent);
        }

        let mode = QueryMode::coerce(mode);
        let credentials =
            Credentials::from_config(&self.config).ok_or(QueryError::MissingCredential)?;

        let root = self.workspace.root(id);
        let settings_path = root.join(SETTINGS_FILE);
        tracing::info!(
            conversation_id = %id,
            mode = %mode,
            query = %preview(text),
            "Querying graph"
        );

        let invocation = EngineInvocation::query(
            &self.config.graphrag_binary,
            &settings_path,
            &root,
            mode,
            text,
            &credentials,
        );
        let output = self.runner.run(invocation).await.map_err(|error| match error {
            EngineError::BinaryMissing { program } => QueryError::BinaryMissing { program },
            other => {
                if debug {
                    tracing::debug!(error = ?other, "Engine error detail");
                }
                QueryError::Unexpected(other.to_string())
            }
        })?;

        let stdout = output.stdout.trim();
        if !output.success() {
            return Err(QueryError::ProcessFailed {
                exit_code: output.exit_code,
                stdout: stdout.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        if debug {
            tracing::info!(conversation_id = %id, characters = stdout.chars().count(), "Raw query response");
        }

        if stdout.is_empty() {
            return Err(QueryError::EmptyResponse);
        }

        tracing::info!(conversation_id = %id, "Query completed");
        Ok(stdout.to_string())
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(QUERY_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
