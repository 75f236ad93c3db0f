//! Tracing configuration and log routing.
//!
//! The server logs to stdout through a compact formatter and to a file. When `GRAPHKB_LOG_FILE`
//! is set, logs are appended to that path; otherwise a file logger is created under
//! `logs/graphkb.log`. Engine output captured from failed builds can be large, so the file
//! writer is non-blocking.
//!
//! The CLI routes everything to stderr instead so that its stdout carries only command output.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "GRAPHKB_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "graphkb.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where log lines are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// Compact stdout layer plus the log file.
    StdoutAndFile,
    /// Stderr only; nothing touches the filesystem.
    Stderr,
}

/// Options for [`init_tracing_with`].
#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: &'static str,
    /// Destination of formatted events.
    pub sink: LogSink,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_directive: "info",
            sink: LogSink::StdoutAndFile,
        }
    }
}

/// Configure tracing for the HTTP server: stdout plus file logging at `info`.
pub fn init_tracing() {
    init_tracing_with(LogOptions::default());
}

/// Configure tracing subscribers.
///
/// - Respects `RUST_LOG` for filtering, falling back to `options.default_directive`.
/// - Keeps the non-blocking file writer guard alive for the process lifetime.
pub fn init_tracing_with(options: LogOptions) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive));

    match options.sink {
        LogSink::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .compact(),
                )
                .init();
        }
        LogSink::StdoutAndFile => {
            let registry = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false).compact());

            if let Some(writer) = configure_file_writer() {
                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_ansi(false)
                    .compact();
                registry.with(file_layer).init();
            } else {
                registry.init();
            }
        }
    }
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    let (non_blocking, guard) = match std::env::var(LOG_FILE_ENV) {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .inspect_err(|err| eprintln!("Failed to open log file {path}: {err}"))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        Err(_) => {
            std::fs::create_dir_all(DEFAULT_LOG_DIR)
                .inspect_err(|err| eprintln!("Failed to create logs directory: {err}"))
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                DEFAULT_LOG_DIR,
                DEFAULT_LOG_FILE,
            ))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
