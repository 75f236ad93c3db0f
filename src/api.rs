//! HTTP surface for the knowledge base.
//!
//! Every route is scoped to one conversation id:
//!
//! - `POST /conversations/:id/documents` – Store a JSON text document (`filename`, `content`).
//! - `POST /conversations/:id/uploads?filename=` – Store a raw upload after text extraction.
//! - `GET /conversations/:id/documents` – List stored documents with character counts.
//! - `POST /conversations/:id/index?debug=` – Build the graph index; returns `{ "success": bool }`.
//! - `POST /conversations/:id/query` – Graph query; `answer` is `null` when the graph has none.
//! - `GET /conversations/:id/search?q=&max_results=` – Keyword fallback search.
//! - `POST /conversations/:id/answer` – Retrieve context and generate an answer from it.
//! - `GET /conversations/:id/stats` – Document and artifact counts.
//! - `DELETE /conversations/:id` – Remove the conversation's workspace.
//! - `GET /metrics` – Build and retrieval counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::documents::DocumentInfo;
use crate::extraction::ExtractionError;
use crate::metrics::MetricsSnapshot;
use crate::query::QueryMode;
use crate::service::{Answer, KnowledgeBaseApi, ServiceError};
use crate::status::IndexStats;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const UPLOAD_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Build the HTTP router exposing the knowledge-base API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: KnowledgeBaseApi + 'static,
{
    Router::new()
        .route(
            "/conversations/:id/documents",
            get(list_documents::<S>).post(add_document::<S>),
        )
        .route(
            "/conversations/:id/uploads",
            post(upload_document::<S>).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/conversations/:id/index", post(build_index::<S>))
        .route("/conversations/:id/query", post(query_graph::<S>))
        .route("/conversations/:id/search", get(search_documents::<S>))
        .route("/conversations/:id/answer", post(answer_question::<S>))
        .route("/conversations/:id/stats", get(get_stats::<S>))
        .route("/conversations/:id", delete(delete_conversation::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

#[derive(Deserialize)]
struct AddDocumentRequest {
    filename: String,
    content: String,
}

#[derive(Serialize)]
struct StoredDocumentResponse {
    filename: String,
}

fn stored(path: &std::path::Path) -> Json<StoredDocumentResponse> {
    Json(StoredDocumentResponse {
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}

async fn add_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddDocumentRequest>,
) -> Result<Json<StoredDocumentResponse>, AppError>
where
    S: KnowledgeBaseApi,
{
    let path = service
        .save_document(id, &request.filename, &request.content)
        .await?;
    Ok(stored(&path))
}

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

/// Store a raw upload. The body is the file itself; the name comes from the query string.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<StoredDocumentResponse>, AppError>
where
    S: KnowledgeBaseApi,
{
    let path = service
        .ingest_upload(id, &params.filename, body.to_vec())
        .await?;
    Ok(stored(&path))
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentInfo>,
}

async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentsResponse>, AppError>
where
    S: KnowledgeBaseApi,
{
    let documents = service.list_documents(id).await?;
    Ok(Json(DocumentsResponse { documents }))
}

#[derive(Deserialize)]
struct BuildParams {
    #[serde(default)]
    debug: bool,
}

#[derive(Serialize)]
struct BuildResponse {
    success: bool,
}

async fn build_index<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Query(params): Query<BuildParams>,
) -> Result<Json<BuildResponse>, AppError>
where
    S: KnowledgeBaseApi,
{
    let success = service.build_index(id, params.debug).await?;
    tracing::info!(conversation_id = %id, success, "Index request completed");
    Ok(Json(BuildResponse { success }))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    debug: bool,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: Option<String>,
}

async fn query_graph<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse>
where
    S: KnowledgeBaseApi,
{
    let mode = request
        .mode
        .unwrap_or_else(|| QueryMode::default().to_string());
    let answer = service
        .query(id, &request.query, &mode, request.debug)
        .await;
    Json(QueryResponse { answer })
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Option<String>,
}

async fn search_documents<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse>
where
    S: KnowledgeBaseApi,
{
    let results = service.search(id, &params.q, params.max_results).await;
    Json(SearchResponse { results })
}

#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
    #[serde(default)]
    mode: Option<String>,
}

async fn answer_question<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Answer>, AppError>
where
    S: KnowledgeBaseApi,
{
    let mode = request
        .mode
        .unwrap_or_else(|| QueryMode::default().to_string());
    let answer = service.answer(id, &request.question, &mode).await?;
    Ok(Json(answer))
}

async fn get_stats<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<IndexStats>, AppError>
where
    S: KnowledgeBaseApi,
{
    Ok(Json(service.stats(id).await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_conversation<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Json<DeleteResponse>
where
    S: KnowledgeBaseApi,
{
    Json(DeleteResponse {
        deleted: service.delete(id).await,
    })
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: KnowledgeBaseApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    let command = |name, method, path, description, request_example| CommandDescriptor {
        name,
        method,
        path,
        description,
        request_example,
    };
    Json(CommandsResponse {
        commands: vec![
            command(
                "add_document",
                "POST",
                "/conversations/:id/documents",
                "Normalize a text document and store it for indexing.",
                Some(json!({ "filename": "lease.txt", "content": "Document contents" })),
            ),
            command(
                "upload_document",
                "POST",
                "/conversations/:id/uploads?filename=",
                "Extract text from a raw PDF or text upload and store it.",
                None,
            ),
            command(
                "list_documents",
                "GET",
                "/conversations/:id/documents",
                "List stored documents with character counts.",
                None,
            ),
            command(
                "build_index",
                "POST",
                "/conversations/:id/index?debug=false",
                "Run graph indexing over the stored documents. Response returns { \"success\": bool }.",
                None,
            ),
            command(
                "query",
                "POST",
                "/conversations/:id/query",
                "Query the graph index in local or global mode; answer is null when none is available.",
                Some(json!({ "query": "Who signed the lease?", "mode": "local" })),
            ),
            command(
                "search",
                "GET",
                "/conversations/:id/search?q=&max_results=3",
                "Keyword search over stored documents, labeled by source file.",
                None,
            ),
            command(
                "answer",
                "POST",
                "/conversations/:id/answer",
                "Retrieve context (graph first, keyword fallback) and generate an answer from it.",
                Some(json!({ "question": "How long is the lease?", "mode": "local" })),
            ),
            command(
                "stats",
                "GET",
                "/conversations/:id/stats",
                "Document, character and artifact counts.",
                None,
            ),
            command(
                "delete",
                "DELETE",
                "/conversations/:id",
                "Remove every document and artifact for the conversation.",
                None,
            ),
            command(
                "metrics",
                "GET",
                "/metrics",
                "Return build and retrieval counters useful for observability dashboards.",
                None,
            ),
        ],
    })
}

struct AppError(ServiceError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Extraction(ExtractionError::Pdf(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::GenerationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
