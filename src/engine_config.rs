//! Engine configuration (`settings.yaml`) generation.
//!
//! The document is a pure function of [`Config`] and the conversation id. It is regenerated
//! before every build and never diffed against a previous copy. The credential itself is never
//! written; the engine resolves `${GRAPHRAG_API_KEY}` from its environment.

use crate::config::Config;
use crate::workspace::{CACHE_DIR, INPUT_DIR, OUTPUT_DIR, WorkspaceError, WorkspaceManager};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Entity vocabulary the engine may extract.
pub const ENTITY_TYPES: [&str; 8] = [
    "organization",
    "person",
    "location",
    "event",
    "concept",
    "technology",
    "law",
    "regulation",
];

const API_KEY_PLACEHOLDER: &str = "${GRAPHRAG_API_KEY}";
const ENCODING_MODEL: &str = "cl100k_base";
const REQUEST_TIMEOUT_SECS: f64 = 180.0;
const SEARCH_MAX_TOKENS: u32 = 8000;

/// Errors raised while producing or persisting the engine configuration.
#[derive(Debug, Error)]
pub enum EngineConfigError {
    /// Settings could not be serialized.
    #[error("failed to render engine settings: {0}")]
    Render(#[from] serde_yaml::Error),
    /// The workspace root could not be prepared.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The rendered document could not be written.
    #[error("failed to write engine settings to {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Location and fingerprint of a freshly written configuration document.
#[derive(Debug, Clone)]
pub struct WrittenConfig {
    /// Path of `settings.yaml`.
    pub path: PathBuf,
    /// Hex SHA-256 of the written bytes.
    pub digest: String,
}

/// Renders and persists the engine's `settings.yaml`.
#[derive(Debug, Clone)]
pub struct EngineConfigEmitter {
    config: Arc<Config>,
    workspace: Arc<WorkspaceManager>,
}

impl EngineConfigEmitter {
    /// Create an emitter for the given settings and workspace layout.
    pub fn new(config: Arc<Config>, workspace: Arc<WorkspaceManager>) -> Self {
        Self { config, workspace }
    }

    /// Render the configuration document for conversation `id`.
    pub fn render(&self, id: Uuid) -> Result<String, EngineConfigError> {
        let body = serde_yaml::to_string(&EngineSettings::from_config(&self.config))?;
        Ok(format!("# Generated for conversation {id}\n{body}"))
    }

    /// Render and write the document to the workspace root, replacing any previous copy.
    pub fn write(&self, id: Uuid) -> Result<WrittenConfig, EngineConfigError> {
        let rendered = self.render(id)?;
        let path = self.workspace.settings_path(id)?;
        fs::write(&path, &rendered).map_err(|source| EngineConfigError::Write {
            path: path.clone(),
            source,
        })?;

        let digest = hex::encode(Sha256::digest(rendered.as_bytes()));
        tracing::info!(
            conversation_id = %id,
            path = %path.display(),
            digest = %digest,
            "Generated engine settings"
        );
        Ok(WrittenConfig { path, digest })
    }
}

#[derive(Serialize)]
struct EngineSettings<'a> {
    encoding_model: &'static str,
    skip_workflows: Vec<String>,
    llm: ChatModel<'a>,
    embeddings: Embeddings<'a>,
    input: Input,
    storage: FileStore,
    cache: FileStore,
    chunks: Chunks,
    entity_extraction: EntityExtraction,
    claim_extraction: ClaimExtraction,
    community_reports: CommunityReports,
    local_search: LocalSearch,
    global_search: GlobalSearch,
}

#[derive(Serialize)]
struct ChatModel<'a> {
    api_key: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    request_timeout: f64,
}

#[derive(Serialize)]
struct Embeddings<'a> {
    async_mode: &'static str,
    llm: EmbeddingModel<'a>,
}

#[derive(Serialize)]
struct EmbeddingModel<'a> {
    api_key: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    model: &'a str,
    request_timeout: f64,
}

#[derive(Serialize)]
struct Input {
    #[serde(rename = "type")]
    kind: &'static str,
    file_type: &'static str,
    base_dir: &'static str,
    encoding: &'static str,
}

#[derive(Serialize)]
struct FileStore {
    #[serde(rename = "type")]
    kind: &'static str,
    base_dir: &'static str,
}

#[derive(Serialize)]
struct Chunks {
    size: usize,
    overlap: usize,
    group_by_columns: [&'static str; 1],
}

#[derive(Serialize)]
struct EntityExtraction {
    max_gleanings: u32,
    entity_types: [&'static str; 8],
}

#[derive(Serialize)]
struct ClaimExtraction {
    enabled: bool,
}

#[derive(Serialize)]
struct CommunityReports {
    max_length: u32,
}

#[derive(Serialize)]
struct LocalSearch {
    text_unit_prop: f64,
    community_prop: f64,
    conversation_history_max_turns: u32,
    top_k_entities: u32,
    top_k_relationships: u32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct GlobalSearch {
    max_tokens: u32,
    data_max_tokens: u32,
    map_max_tokens: u32,
    reduce_max_tokens: u32,
}

impl<'a> EngineSettings<'a> {
    fn from_config(config: &'a Config) -> Self {
        Self {
            encoding_model: ENCODING_MODEL,
            skip_workflows: Vec::new(),
            llm: ChatModel {
                api_key: API_KEY_PLACEHOLDER,
                kind: "openai_chat",
                model: &config.openai_model,
                max_tokens: 4000,
                temperature: 0.0,
                request_timeout: REQUEST_TIMEOUT_SECS,
            },
            embeddings: Embeddings {
                async_mode: "threaded",
                llm: EmbeddingModel {
                    api_key: API_KEY_PLACEHOLDER,
                    kind: "openai_embedding",
                    model: &config.openai_embedding_model,
                    request_timeout: REQUEST_TIMEOUT_SECS,
                },
            },
            input: Input {
                kind: "file",
                file_type: "text",
                base_dir: INPUT_DIR,
                encoding: "utf-8",
            },
            storage: FileStore {
                kind: "file",
                base_dir: OUTPUT_DIR,
            },
            cache: FileStore {
                kind: "file",
                base_dir: CACHE_DIR,
            },
            chunks: Chunks {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
                group_by_columns: ["id"],
            },
            entity_extraction: EntityExtraction {
                max_gleanings: 1,
                entity_types: ENTITY_TYPES,
            },
            claim_extraction: ClaimExtraction { enabled: false },
            community_reports: CommunityReports { max_length: 1500 },
            local_search: LocalSearch {
                text_unit_prop: 0.5,
                community_prop: 0.25,
                conversation_history_max_turns: 5,
                top_k_entities: 10,
                top_k_relationships: 10,
                max_tokens: SEARCH_MAX_TOKENS,
            },
            global_search: GlobalSearch {
                max_tokens: SEARCH_MAX_TOKENS,
                data_max_tokens: SEARCH_MAX_TOKENS,
                map_max_tokens: 4000,
                reduce_max_tokens: 4000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;
    use tempfile::TempDir;

    fn emitter(config: Config) -> (TempDir, EngineConfigEmitter) {
        let temp = TempDir::new().expect("tempdir");
        let workspace = Arc::new(WorkspaceManager::new(temp.path()));
        (temp, EngineConfigEmitter::new(Arc::new(config), workspace))
    }

    #[test]
    fn render_is_deterministic_for_unchanged_settings() {
        let (_temp, emitter) = emitter(Config::with_data_dir("/unused"));
        let id = Uuid::new_v4();

        let first = emitter.render(id).expect("first render");
        let second = emitter.render(id).expect("second render");
        assert_eq!(first, second);
    }

    #[test]
    fn render_fixes_chunking_vocabulary_and_claims() {
        let (_temp, emitter) = emitter(Config::with_data_dir("/unused"));
        let rendered = emitter.render(Uuid::new_v4()).expect("render");
        let value: Value = serde_yaml::from_str(&rendered).expect("valid yaml");

        assert_eq!(value["chunks"]["size"].as_u64(), Some(300));
        assert_eq!(value["chunks"]["overlap"].as_u64(), Some(50));
        assert_eq!(value["claim_extraction"]["enabled"].as_bool(), Some(false));
        assert_eq!(value["community_reports"]["max_length"].as_u64(), Some(1500));
        assert_eq!(value["global_search"]["max_tokens"].as_u64(), Some(8000));
        assert_eq!(value["input"]["base_dir"].as_str(), Some("input"));
        assert_eq!(value["storage"]["base_dir"].as_str(), Some("output"));

        let entity_types: Vec<&str> = value["entity_extraction"]["entity_types"]
            .as_sequence()
            .expect("entity types")
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(entity_types, ENTITY_TYPES);
    }

    #[test]
    fn render_reflects_models_but_never_the_credential() {
        let mut config = Config::with_data_dir("/unused");
        config.openai_model = "gpt-test".into();
        config.openai_embedding_model = "embed-test".into();
        config.openai_api_key = Some("sk-secret-value".into());
        let (_temp, emitter) = emitter(config);

        let rendered = emitter.render(Uuid::new_v4()).expect("render");
        let value: Value = serde_yaml::from_str(&rendered).expect("valid yaml");

        assert_eq!(value["llm"]["model"].as_str(), Some("gpt-test"));
        assert_eq!(value["llm"]["type"].as_str(), Some("openai_chat"));
        assert_eq!(value["embeddings"]["llm"]["model"].as_str(), Some("embed-test"));
        assert_eq!(value["llm"]["api_key"].as_str(), Some("${GRAPHRAG_API_KEY}"));
        assert!(!rendered.contains("sk-secret-value"));
    }

    #[test]
    fn write_replaces_settings_file_and_reports_digest() {
        let (_temp, emitter) = emitter(Config::with_data_dir("/unused"));
        let id = Uuid::new_v4();

        let first = emitter.write(id).expect("first write");
        fs::write(&first.path, "stale").expect("clobber");
        let second = emitter.write(id).expect("second write");

        assert_eq!(first.path, second.path);
        assert!(first.path.ends_with("settings.yaml"));
        assert_eq!(first.digest, second.digest);
        assert_eq!(
            fs::read_to_string(&second.path).expect("read"),
            emitter.render(id).expect("render")
        );
    }
}
