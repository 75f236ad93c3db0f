use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_DATA_DIR: &str = "./graphrag_data";
const DEFAULT_BINARY: &str = "graphrag";
const DEFAULT_CHUNK_SIZE: usize = 300;
const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration shared by every knowledge-base component.
///
/// Built once at process start and handed to [`crate::service::KnowledgeBaseService`] behind an
/// `Arc`; nothing reads the environment after that point.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Credential forwarded to the graph engine and the generation client.
    pub openai_api_key: Option<String>,
    /// Chat model used by the engine and by answer generation.
    pub openai_model: String,
    /// Embedding model used by the engine.
    pub openai_embedding_model: String,
    /// Optional OpenAI-compatible endpoint override.
    pub openai_base_url: Option<String>,
    /// Root under which every conversation workspace lives.
    pub graphrag_data_dir: PathBuf,
    /// Executable invoked for `index` and `query`.
    pub graphrag_binary: String,
    /// Chunk size written into the engine settings.
    pub chunk_size: usize,
    /// Chunk overlap written into the engine settings.
    pub chunk_overlap: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Character thresholds applied during ingestion, indexing, and fallback search.
    #[serde(default)]
    pub policy: ContentPolicy,
}

/// Character thresholds used across the knowledge-base lifecycle.
///
/// The values are policy defaults rather than tuned constants.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct ContentPolicy {
    /// Documents shorter than this (after trimming) are saved with a warning.
    pub min_document_chars: usize,
    /// Unbroken documents longer than this get synthetic paragraph breaks.
    pub paragraph_synthesis_chars: usize,
    /// Builds with fewer total characters than this are refused.
    pub min_total_chars: usize,
    /// Builds below this total proceed with a low-volume warning.
    pub low_volume_chars: usize,
    /// Fallback search ignores paragraphs shorter than this.
    pub min_paragraph_chars: usize,
    /// Fallback search truncates each returned paragraph to this many characters.
    pub snippet_chars: usize,
    /// Number of fallback results returned when the caller does not choose.
    pub default_max_results: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            min_document_chars: 100,
            paragraph_synthesis_chars: 200,
            min_total_chars: 50,
            low_volume_chars: 200,
            min_paragraph_chars: 50,
            snippet_chars: 800,
            default_max_results: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_model: load_env_or("OPENAI_MODEL", DEFAULT_MODEL),
            openai_embedding_model: load_env_or("OPENAI_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            graphrag_data_dir: PathBuf::from(load_env_or("GRAPHRAG_DATA_DIR", DEFAULT_DATA_DIR)),
            graphrag_binary: load_env_or("GRAPHRAG_BINARY", DEFAULT_BINARY),
            chunk_size: parse_env_optional("GRAPHRAG_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: parse_env_optional("GRAPHRAG_CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            server_port: parse_env_optional("SERVER_PORT")?,
            policy: ContentPolicy::default(),
        })
    }

    /// Default configuration rooted at `data_dir`, with no credential configured.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_MODEL.into(),
            openai_embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            openai_base_url: None,
            graphrag_data_dir: data_dir.into(),
            graphrag_binary: DEFAULT_BINARY.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            server_port: None,
            policy: ContentPolicy::default(),
        }
    }

    /// Configured API credential, if a non-blank one is present.
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    /// Configured API credential, or an error naming the missing variable.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key()
            .ok_or_else(|| ConfigError::MissingVariable("OPENAI_API_KEY".to_string()))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("has_api_key", &self.api_key().is_some())
            .field("openai_model", &self.openai_model)
            .field("openai_embedding_model", &self.openai_embedding_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("graphrag_data_dir", &self.graphrag_data_dir)
            .field("graphrag_binary", &self.graphrag_binary)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("server_port", &self.server_port)
            .field("policy", &self.policy)
            .finish()
    }
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Load `.env` (when present) and build the configuration from the process environment.
pub fn load_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        data_dir = %config.graphrag_data_dir.display(),
        binary = %config.graphrag_binary,
        model = %config.openai_model,
        embedding_model = %config.openai_embedding_model,
        has_api_key = config.api_key().is_some(),
        custom_base_url = config.openai_base_url.is_some(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}
