use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing knowledge-base activity since startup.
#[derive(Debug, Default)]
pub struct KbMetrics {
    builds_succeeded: AtomicU64,
    builds_failed: AtomicU64,
    graph_answers: AtomicU64,
    fallback_answers: AtomicU64,
    unanswered: AtomicU64,
}

impl KbMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an index build.
    pub fn record_build(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.builds_succeeded
        } else {
            &self.builds_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retrieval answered from the graph index.
    pub fn record_graph_answer(&self) {
        self.graph_answers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retrieval answered by keyword fallback.
    pub fn record_fallback_answer(&self) {
        self.fallback_answers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retrieval that found nothing.
    pub fn record_unanswered(&self) {
        self.unanswered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            builds_succeeded: self.builds_succeeded.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
            graph_answers: self.graph_answers.load(Ordering::Relaxed),
            fallback_answers: self.fallback_answers.load(Ordering::Relaxed),
            unanswered: self.unanswered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Builds that ended with the engine exiting successfully.
    pub builds_succeeded: u64,
    /// Builds that failed validation or whose engine run failed.
    pub builds_failed: u64,
    /// Retrievals answered by a graph query.
    pub graph_answers: u64,
    /// Retrievals answered by keyword fallback.
    pub fallback_answers: u64,
    /// Retrievals with no answer from either source.
    pub unanswered: u64,
}
