#![deny(missing_docs)]

//! Per-conversation knowledge bases built with the `graphrag` CLI, with keyword fallback.
//!
//! Each conversation owns an isolated workspace (`<data_dir>/<uuid>/`) holding its input
//! documents, generated engine settings, and the artifact set produced by `graphrag index`.
//! [`service::KnowledgeBaseService`] wires the components together and is the entry point for
//! both binaries.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Document normalization and storage.
pub mod documents;
/// External engine process contract and runners.
pub mod engine;
/// Engine `settings.yaml` generation.
pub mod engine_config;
/// Text extraction for uploaded files.
pub mod extraction;
/// Fallback keyword search over raw documents.
pub mod fallback;
/// Index build orchestration.
pub mod indexing;
/// OpenAI-compatible generation client.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Build and retrieval counters.
pub mod metrics;
/// Graph query routing.
pub mod query;
/// Knowledge-base facade shared by the HTTP server and CLI.
pub mod service;
/// Workspace statistics.
pub mod status;
/// Per-conversation directory layout.
pub mod workspace;
