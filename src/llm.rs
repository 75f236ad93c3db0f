//! OpenAI-compatible chat-completions client used to turn retrieved context into answers.
//!
//! Talks to `{base_url}/chat/completions` directly over `reqwest`, so any endpoint that speaks the
//! same wire format (set via `OPENAI_BASE_URL`) works. Streaming responses are parsed from
//! server-sent events.

use crate::config::{Config, ConfigError};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 4000;
const STREAM_DONE: &str = "[DONE]";

/// Errors surfaced by the generation client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The client could not be built from configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP request failed before a response arrived.
    #[error("request to the model endpoint failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("model endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The response could not be decoded.
    #[error("malformed model response: {0}")]
    InvalidResponse(String),
}

/// One message in a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system` or `user`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Incremental answer text.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Text generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete `prompt`, optionally steered by `system`.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;

    /// Like [`Generator::generate`], yielding text as it is produced.
    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<TextStream, LlmError>;
}

/// Basic metadata reported by `GET /models/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Owning organization, when reported.
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// Chat-completions client bound to one model.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Client for the configured model and endpoint. Fails when no API key is set.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let api_key = config.require_api_key()?;
        let base_url = config
            .openai_base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key, &config.openai_model)
    }

    /// Client for an explicit endpoint.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("graphkb/llm")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Model this client targets.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    /// Complete a conversation. `system`, when given, is prepended as the first message.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        let messages = with_system(messages, system);
        let response = self.send_completion(&messages, false).await?;
        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".into()))
    }

    /// Streaming form of [`OpenAiClient::chat`].
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        let messages = with_system(messages, system);
        let response = self.send_completion(&messages, true).await?;
        Ok(Box::pin(sse_deltas(response)))
    }

    /// Metadata for the configured model.
    pub async fn model_info(&self) -> Result<ModelInfo, LlmError> {
        let response = self
            .http
            .get(self.endpoint(&format!("models/{}", self.model)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))
    }

    /// Whether the endpoint accepts our credential and knows the model.
    pub async fn health_check(&self) -> bool {
        match self.model_info().await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(model = %self.model, error = %error, "Model endpoint health check failed");
                false
            }
        }
    }

    async fn send_completion(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream,
        };
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        self.chat(&[ChatMessage::user(prompt)], system).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        self.chat_stream(&[ChatMessage::user(prompt)], system).await
    }
}

fn with_system(messages: &[ChatMessage], system: Option<&str>) -> Vec<ChatMessage> {
    system
        .map(ChatMessage::system)
        .into_iter()
        .chain(messages.iter().cloned())
        .collect()
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Status {
        status: status.as_u16(),
        body,
    })
}

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &[u8]) -> Result<SseLine, LlmError> {
    let line = String::from_utf8_lossy(line);
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == STREAM_DONE {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|error| LlmError::InvalidResponse(format!("bad stream event: {error}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map_or(SseLine::Skip, SseLine::Delta))
}

fn sse_deltas(response: reqwest::Response) -> impl Stream<Item = Result<String, LlmError>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        'events: while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match parse_sse_line(&line)? {
                    SseLine::Delta(text) => {
                        yield text;
                    }
                    SseLine::Done => break 'events,
                    SseLine::Skip => {}
                }
            }
        }
    }
}
