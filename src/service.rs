//! Knowledge-base facade coordinating documents, index builds, queries, and fallback search.

use crate::{
    config::Config,
    documents::{DocumentError, DocumentInfo, DocumentStore},
    engine::{CliRunner, EngineRunner},
    engine_config::{EngineConfigEmitter, EngineConfigError},
    extraction::{DefaultExtractor, ExtractionError, TextExtractor, clean_text},
    fallback::FallbackSearch,
    indexing::{BuildError, BuildReport, IndexBuilder, log_build_failure},
    llm::{Generator, LlmError, OpenAiClient, TextStream},
    metrics::{KbMetrics, MetricsSnapshot},
    query::QueryRouter,
    status::{IndexStats, StatusReporter},
    workspace::{WorkspaceError, WorkspaceManager},
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions about the user's documents. \
Use only the provided context. If the context does not contain the answer, say so plainly.";

/// Errors surfaced through [`KnowledgeBaseApi`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Saving or listing documents failed.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// An upload could not be turned into text.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// The engine settings could not be written during a build.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The workspace could not be inspected.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The engine settings could not be rendered.
    #[error(transparent)]
    EngineConfig(#[from] EngineConfigError),
    /// The generation endpoint failed.
    #[error(transparent)]
    Generation(#[from] LlmError),
    /// No generation client is configured.
    #[error("answer generation is unavailable: OPENAI_API_KEY not set")]
    GenerationUnavailable,
    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which retrieval path produced a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    /// The graph engine answered.
    Graph,
    /// Keyword fallback over the raw documents answered.
    Fallback,
}

/// Context retrieved for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedContext {
    /// Retrieved text.
    pub text: String,
    /// Path that produced it.
    pub source: ContextSource,
}

/// A generated answer and where its grounding came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    /// Model output.
    pub text: String,
    /// Retrieval path used, `None` when nothing relevant was found.
    pub source: Option<ContextSource>,
}

/// One async mutex per conversation, created on first use and dropped once nobody holds or
/// waits on it.
#[derive(Default)]
struct TenantLocks {
    inner: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, id: Uuid) -> TenantGuard<'_> {
        let lock = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        TenantGuard {
            locks: self,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn release(&self, guard: OwnedMutexGuard<()>) {
        // Clones are only handed out under the map mutex, so a count of one means no holder
        // and no waiter. Sweeping every entry also clears locks left by cancelled waiters.
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held for the duration of a build, graph query, or delete.
struct TenantGuard<'a> {
    locks: &'a TenantLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TenantGuard<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.locks.release(guard);
        }
    }
}

/// Owns every knowledge-base component for the process.
///
/// Construct once near process start and share through an `Arc`. Builds and graph queries for
/// the same conversation are serialized; different conversations never contend.
pub struct KnowledgeBaseService {
    config: Arc<Config>,
    workspace: Arc<WorkspaceManager>,
    documents: DocumentStore,
    emitter: EngineConfigEmitter,
    builder: IndexBuilder,
    router: QueryRouter,
    fallback: FallbackSearch,
    status: StatusReporter,
    extractor: Arc<dyn TextExtractor>,
    generator: Option<Arc<dyn Generator>>,
    metrics: KbMetrics,
    locks: TenantLocks,
}

/// Operations used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait KnowledgeBaseApi: Send + Sync {
    /// Normalize and store a text document.
    async fn save_document(
        &self,
        id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf, ServiceError>;

    /// Extract, clean and store an uploaded file.
    async fn ingest_upload(
        &self,
        id: Uuid,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, ServiceError>;

    /// Enumerate stored documents.
    async fn list_documents(&self, id: Uuid) -> Result<Vec<DocumentInfo>, ServiceError>;

    /// Build the graph index; `Ok(false)` for every failure except settings write errors.
    async fn build_index(&self, id: Uuid, debug: bool) -> Result<bool, ServiceError>;

    /// Graph answer, or `None`.
    async fn query(&self, id: Uuid, text: &str, mode: &str, debug: bool) -> Option<String>;

    /// Keyword fallback results, or `None`.
    async fn search(&self, id: Uuid, query: &str, max_results: Option<usize>) -> Option<String>;

    /// Retrieve context and generate an answer from it.
    async fn answer(&self, id: Uuid, question: &str, mode: &str) -> Result<Answer, ServiceError>;

    /// Live workspace statistics.
    async fn stats(&self, id: Uuid) -> Result<IndexStats, ServiceError>;

    /// Remove the conversation's workspace. `false` when nothing was there.
    async fn delete(&self, id: Uuid) -> bool;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl KnowledgeBaseService {
    /// Service driving the real `graphrag` executable. A generation client is attached when an
    /// API key is configured.
    pub fn new(config: Arc<Config>) -> Self {
        let service = Self::with_runner(config.clone(), Arc::new(CliRunner));
        match OpenAiClient::from_config(&config) {
            Ok(client) => service.with_generator(Arc::new(client)),
            Err(error) => {
                tracing::debug!(error = %error, "Answer generation disabled");
                service
            }
        }
    }

    /// Service using `runner` for every engine invocation and no generation client.
    pub fn with_runner(config: Arc<Config>, runner: Arc<dyn EngineRunner>) -> Self {
        let workspace = Arc::new(WorkspaceManager::new(config.graphrag_data_dir.clone()));
        let policy = config.policy;
        let documents = DocumentStore::new(workspace.clone(), policy);
        let emitter = EngineConfigEmitter::new(config.clone(), workspace.clone());
        let builder = IndexBuilder::new(
            config.clone(),
            workspace.clone(),
            documents.clone(),
            emitter.clone(),
            runner.clone(),
        );
        let router = QueryRouter::new(config.clone(), workspace.clone(), runner);

        Self {
            fallback: FallbackSearch::new(workspace.clone(), policy),
            status: StatusReporter::new(workspace.clone()),
            config,
            workspace,
            documents,
            emitter,
            builder,
            router,
            extractor: Arc::new(DefaultExtractor),
            generator: None,
            metrics: KbMetrics::new(),
            locks: TenantLocks::default(),
        }
    }

    /// Replace the upload extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Attach a generation client used by [`KnowledgeBaseService::answer`].
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Configuration shared by every component.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalize `content` and store it under the conversation's input directory.
    pub fn save_document(
        &self,
        id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf, DocumentError> {
        self.documents.save(id, filename, content)
    }

    /// Extract text from an uploaded file off the async runtime, clean it, and store it.
    pub async fn ingest_upload(
        &self,
        id: Uuid,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, ServiceError> {
        let extractor = self.extractor.clone();
        let name = filename.to_string();
        let size = bytes.len();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name)).await??;

        let cleaned = clean_text(&text);
        tracing::info!(
            conversation_id = %id,
            file = filename,
            bytes = size,
            characters = cleaned.chars().count(),
            "Extracted upload"
        );
        Ok(self.documents.save(id, filename, &cleaned)?)
    }

    /// Stored documents with their character counts.
    pub fn list_documents(&self, id: Uuid) -> Result<Vec<DocumentInfo>, DocumentError> {
        self.documents.list(id)
    }

    /// Build the graph index and return the typed outcome.
    ///
    /// Holds the conversation's lock for the whole build.
    pub async fn build_index_report(
        &self,
        id: Uuid,
        debug: bool,
    ) -> Result<BuildReport, BuildError> {
        let _guard = self.locks.acquire(id).await;

        let outcome = self.builder.build(id, debug).await;
        self.metrics.record_build(outcome.is_ok());
        outcome
    }

    /// Build the graph index.
    ///
    /// Returns `Ok(true)` when the engine succeeded and `Ok(false)` for every logged failure.
    /// Only a failure to write the engine settings propagates as `Err`.
    pub async fn build_index(&self, id: Uuid, debug: bool) -> Result<bool, BuildError> {
        match self.build_index_report(id, debug).await {
            Ok(_) => Ok(true),
            Err(error @ BuildError::ConfigWrite(_)) => {
                tracing::error!(conversation_id = %id, error = %error, "Failed to write engine settings");
                Err(error)
            }
            Err(error) => {
                log_build_failure(id, &error, debug);
                Ok(false)
            }
        }
    }

    /// Answer `text` from the graph index, or `None` on any failure.
    ///
    /// Holds the conversation's lock so a query never observes a half-written index.
    pub async fn query(&self, id: Uuid, text: &str, mode: &str, debug: bool) -> Option<String> {
        let _guard = self.locks.acquire(id).await;
        self.router.query(id, text, mode, debug).await
    }

    /// Keyword fallback over the raw documents.
    pub fn search(&self, id: Uuid, query: &str, max_results: Option<usize>) -> Option<String> {
        let max_results = max_results.unwrap_or(self.config.policy.default_max_results);
        self.fallback.search(id, query, max_results)
    }

    /// Graph answer when an index exists, keyword fallback otherwise.
    pub async fn retrieve_context(
        &self,
        id: Uuid,
        question: &str,
        mode: &str,
        max_results: Option<usize>,
    ) -> Option<RetrievedContext> {
        if self.workspace.has_output(id)
            && let Some(text) = self.query(id, question, mode, false).await
        {
            self.metrics.record_graph_answer();
            return Some(RetrievedContext {
                text,
                source: ContextSource::Graph,
            });
        }

        match self.search(id, question, max_results) {
            Some(text) => {
                self.metrics.record_fallback_answer();
                Some(RetrievedContext {
                    text,
                    source: ContextSource::Fallback,
                })
            }
            None => {
                self.metrics.record_unanswered();
                tracing::info!(conversation_id = %id, "No relevant context found");
                None
            }
        }
    }

    /// Retrieve context for `question` and have the generation client answer from it.
    pub async fn answer(&self, id: Uuid, question: &str, mode: &str) -> Result<Answer, ServiceError> {
        let generator = self.generator()?;
        let (prompt, source) = self.grounded_prompt(id, question, mode).await;
        let text = generator
            .generate(&prompt, Some(ANSWER_SYSTEM_PROMPT))
            .await?;

        Ok(Answer { text, source })
    }

    /// Streaming form of [`KnowledgeBaseService::answer`]. The retrieval source is known before
    /// the first token arrives.
    pub async fn answer_stream(
        &self,
        id: Uuid,
        question: &str,
        mode: &str,
    ) -> Result<(Option<ContextSource>, TextStream), ServiceError> {
        let generator = self.generator()?;
        let (prompt, source) = self.grounded_prompt(id, question, mode).await;
        let stream = generator
            .generate_stream(&prompt, Some(ANSWER_SYSTEM_PROMPT))
            .await?;
        Ok((source, stream))
    }

    fn generator(&self) -> Result<Arc<dyn Generator>, ServiceError> {
        self.generator
            .clone()
            .ok_or(ServiceError::GenerationUnavailable)
    }

    async fn grounded_prompt(
        &self,
        id: Uuid,
        question: &str,
        mode: &str,
    ) -> (String, Option<ContextSource>) {
        let context = self.retrieve_context(id, question, mode, None).await;
        (
            answer_prompt(question, context.as_ref()),
            context.map(|context| context.source),
        )
    }

    /// Live statistics for the conversation.
    pub fn stats(&self, id: Uuid) -> Result<IndexStats, WorkspaceError> {
        self.status.stats(id)
    }

    /// Remove the conversation's workspace, waiting for any in-flight build or query.
    pub async fn delete(&self, id: Uuid) -> bool {
        let _guard = self.locks.acquire(id).await;
        self.workspace.delete(id)
    }

    /// The `settings.yaml` document a build would write, without touching the disk.
    pub fn render_engine_config(&self, id: Uuid) -> Result<String, EngineConfigError> {
        self.emitter.render(id)
    }

    /// Log statistics and a preview of every input document.
    pub fn debug_dump(&self, id: Uuid) {
        self.documents.debug_dump(id);
    }

    /// Return a snapshot of the in-process counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn answer_prompt(question: &str, context: Option<&RetrievedContext>) -> String {
    match context {
        Some(context) => format!("Context:\n{}\n\nQuestion: {question}", context.text),
        None => format!("No relevant context was found in the documents.\n\nQuestion: {question}"),
    }
}

#[async_trait]
impl KnowledgeBaseApi for KnowledgeBaseService {
    async fn save_document(
        &self,
        id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf, ServiceError> {
        Ok(KnowledgeBaseService::save_document(self, id, filename, content)?)
    }

    async fn ingest_upload(
        &self,
        id: Uuid,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, ServiceError> {
        KnowledgeBaseService::ingest_upload(self, id, filename, bytes).await
    }

    async fn list_documents(&self, id: Uuid) -> Result<Vec<DocumentInfo>, ServiceError> {
        Ok(KnowledgeBaseService::list_documents(self, id)?)
    }

    async fn build_index(&self, id: Uuid, debug: bool) -> Result<bool, ServiceError> {
        Ok(KnowledgeBaseService::build_index(self, id, debug).await?)
    }

    async fn query(&self, id: Uuid, text: &str, mode: &str, debug: bool) -> Option<String> {
        KnowledgeBaseService::query(self, id, text, mode, debug).await
    }

    async fn search(&self, id: Uuid, query: &str, max_results: Option<usize>) -> Option<String> {
        KnowledgeBaseService::search(self, id, query, max_results)
    }

    async fn answer(&self, id: Uuid, question: &str, mode: &str) -> Result<Answer, ServiceError> {
        KnowledgeBaseService::answer(self, id, question, mode).await
    }

    async fn stats(&self, id: Uuid) -> Result<IndexStats, ServiceError> {
        Ok(KnowledgeBaseService::stats(self, id)?)
    }

    async fn delete(&self, id: Uuid) -> bool {
        KnowledgeBaseService::delete(self, id).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        KnowledgeBaseService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingRunner;
    use std::fs;
    use tempfile::TempDir;

    const LEASE: &str = "The lease term is five years and rent is due on the first day of every month.";

    struct StubGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            Ok("Five years.".into())
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            _system: Option<&str>,
        ) -> Result<TextStream, LlmError> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            let chunks: Vec<Result<String, LlmError>> =
                vec![Ok("Five ".into()), Ok("years.".into())];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    fn service(runner: RecordingRunner) -> (TempDir, Arc<RecordingRunner>, KnowledgeBaseService) {
        let temp = TempDir::new().expect("tempdir");
        let mut config = Config::with_data_dir(temp.path());
        config.openai_api_key = Some("sk-test".into());
        let runner = Arc::new(runner);
        let service = KnowledgeBaseService::with_runner(Arc::new(config), runner.clone());
        (temp, runner, service)
    }

    #[tokio::test]
    async fn build_failures_become_false() {
        let (_temp, runner, service) = service(RecordingRunner::exiting(1, "Empty DataFrame", ""));
        let id = Uuid::new_v4();

        assert!(!service.build_index(id, false).await.expect("no documents"));
        assert!(runner.calls().is_empty());

        service.save_document(id, "lease.txt", &LEASE.repeat(4)).expect("save");
        assert!(!service.build_index(id, true).await.expect("process failure"));
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(service.metrics_snapshot().builds_failed, 2);
    }

    #[tokio::test]
    async fn successful_build_enables_graph_queries() {
        let (_temp, runner, service) = service(RecordingRunner::succeeding("Five years."));
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", &LEASE.repeat(4)).expect("save");

        assert!(service.build_index(id, false).await.expect("build"));
        assert_eq!(service.metrics_snapshot().builds_succeeded, 1);

        let context = service
            .retrieve_context(id, "lease term", "local", None)
            .await
            .expect("context");
        assert_eq!(context.source, ContextSource::Graph);
        assert_eq!(context.text, "Five years.");
        assert_eq!(runner.calls()[1].subcommand(), Some("query"));
    }

    #[tokio::test]
    async fn retrieval_falls_back_to_keywords_without_index() {
        let (_temp, runner, service) = service(RecordingRunner::succeeding("unused"));
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", LEASE).expect("save");

        let context = service
            .retrieve_context(id, "lease term", "global", None)
            .await
            .expect("fallback");
        assert_eq!(context.source, ContextSource::Fallback);
        assert!(context.text.starts_with("[From: lease.txt]"));
        assert!(runner.calls().is_empty());

        assert!(service.retrieve_context(id, "zebra", "local", None).await.is_none());
        let metrics = service.metrics_snapshot();
        assert_eq!((metrics.fallback_answers, metrics.unanswered), (1, 1));
    }

    #[tokio::test]
    async fn failed_graph_query_falls_back() {
        let (_temp, _runner, service) = service(RecordingRunner::exiting(1, "", "boom"));
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", LEASE).expect("save");
        service.workspace.output_dir(id).expect("output");

        let context = service
            .retrieve_context(id, "rent due", "local", Some(1))
            .await
            .expect("fallback");
        assert_eq!(context.source, ContextSource::Fallback);
    }

    #[tokio::test]
    async fn answer_uses_generator_with_retrieved_context() {
        let (_temp, _runner, service) = service(RecordingRunner::succeeding("unused"));
        let generator = Arc::new(StubGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let service = service.with_generator(generator.clone());
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", LEASE).expect("save");

        let answer = service.answer(id, "lease term?", "local").await.expect("answer");
        assert_eq!(answer.text, "Five years.");
        assert_eq!(answer.source, Some(ContextSource::Fallback));
        let prompts = generator.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("[From: lease.txt]"));
        assert!(prompts[0].ends_with("Question: lease term?"));
    }

    #[tokio::test]
    async fn streamed_answer_reports_source_before_text() {
        use futures_util::StreamExt;

        let (_temp, _runner, service) = service(RecordingRunner::succeeding("unused"));
        let generator = Arc::new(StubGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let service = service.with_generator(generator.clone());
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", LEASE).expect("save");

        let (source, mut stream) = service
            .answer_stream(id, "rent due?", "local")
            .await
            .expect("stream");
        assert_eq!(source, Some(ContextSource::Fallback));

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.expect("chunk"));
        }
        assert_eq!(text, "Five years.");
        assert!(generator.prompts.lock().expect("prompts")[0].contains("[From: lease.txt]"));
    }

    #[tokio::test]
    async fn answer_without_generator_is_unavailable() {
        let (_temp, _runner, service) = service(RecordingRunner::succeeding(""));
        assert!(matches!(
            service.answer(Uuid::new_v4(), "q", "local").await,
            Err(ServiceError::GenerationUnavailable)
        ));
        assert!(matches!(
            service.answer_stream(Uuid::new_v4(), "q", "local").await,
            Err(ServiceError::GenerationUnavailable)
        ));
    }

    #[tokio::test]
    async fn uploads_are_extracted_cleaned_and_saved() {
        let (_temp, _runner, service) = service(RecordingRunner::succeeding(""));
        let id = Uuid::new_v4();

        let path = service
            .ingest_upload(id, "notes.md", b"  Title  \n\n\n\n  Body line  \n".to_vec())
            .await
            .expect("upload");
        assert!(path.ends_with("input/notes.txt"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "Title\n\nBody line\n");

        assert!(matches!(
            service.ingest_upload(id, "image.png", vec![0x89, 0x00, 0x01]).await,
            Err(ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. }))
        ));
    }

    #[tokio::test]
    async fn delete_removes_workspace_and_lock() {
        let (_temp, _runner, service) = service(RecordingRunner::succeeding(""));
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", LEASE).expect("save");

        assert!(service.delete(id).await);
        assert!(!service.delete(id).await);
        assert_eq!(service.locks.tracked(), 0);
        assert_eq!(service.stats(id).expect("stats"), IndexStats::default());
    }

    #[tokio::test]
    async fn builds_for_one_conversation_are_serialized() {
        let (_temp, runner, service) = service(RecordingRunner::succeeding("ok"));
        let service = Arc::new(service);
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", &LEASE.repeat(4)).expect("save");

        let guard = service.locks.acquire(id).await;
        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.build_index(id, false).await }
        });
        tokio::task::yield_now().await;
        assert!(runner.calls().is_empty());

        drop(guard);
        assert!(pending.await.expect("join").expect("build"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn lock_table_does_not_grow_for_unknown_conversations() {
        let (_temp, runner, service) = service(RecordingRunner::succeeding(""));

        for _ in 0..3 {
            let id = Uuid::new_v4();
            assert!(service.query(id, "anything", "local", false).await.is_none());
            assert!(!service.build_index(id, false).await.expect("build"));
        }
        assert!(runner.calls().is_empty());
        assert_eq!(service.locks.tracked(), 0);
    }

    #[tokio::test]
    async fn waiters_queued_behind_delete_keep_serializing() {
        let (_temp, runner, service) = service(RecordingRunner::succeeding("ok"));
        let service = Arc::new(service);
        let id = Uuid::new_v4();
        service.save_document(id, "lease.txt", &LEASE.repeat(4)).expect("save");

        let held = service.locks.acquire(id).await;
        let deleting = tokio::spawn({
            let service = service.clone();
            async move { service.delete(id).await }
        });
        tokio::task::yield_now().await;

        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let queued = tokio::spawn({
            let service = service.clone();
            async move {
                let _guard = service.locks.acquire(id).await;
                acquired_tx.send(()).expect("signal acquired");
                release_rx.await.ok();
            }
        });
        tokio::task::yield_now().await;

        drop(held);
        assert!(deleting.await.expect("join delete"));
        acquired_rx.await.expect("queued task acquired the lock");
        assert_eq!(service.locks.tracked(), 1);

        service.save_document(id, "lease.txt", &LEASE.repeat(4)).expect("save again");
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            service.build_index(id, false),
        )
        .await;
        assert!(blocked.is_err(), "build ran while the lock was held");
        assert!(runner.calls().is_empty());

        release_tx.send(()).expect("release queued task");
        queued.await.expect("join queued");
        assert!(service.build_index(id, false).await.expect("build"));
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(service.locks.tracked(), 0);
    }

    #[test]
    fn rendered_config_is_available_without_writing() {
        let (_temp, _runner, service) = service(RecordingRunner::succeeding(""));
        let id = Uuid::new_v4();
        let rendered = service.render_engine_config(id).expect("render");
        assert!(rendered.contains("${GRAPHRAG_API_KEY}"));
        assert!(!service.workspace.root(id).join("settings.yaml").exists());
    }
}
