//! Keyword-overlap retrieval over the raw documents, used when no graph index answers.
//!
//! Nothing is indexed or cached: every call rescans the input directory, splits documents on
//! blank lines, and scores paragraphs by how many distinct lowercase words they share with the
//! query. Ties keep file order, then paragraph order.

use crate::config::ContentPolicy;
use crate::documents::{file_name, read_text};
use crate::workspace::WorkspaceManager;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// A paragraph that shares at least one word with the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredParagraph {
    /// Number of distinct query words present in the paragraph.
    pub score: usize,
    /// Paragraph text, truncated to the snippet limit.
    pub text: String,
    /// File the paragraph came from.
    pub source: String,
}

/// Rank paragraphs of `documents` (`(filename, content)` pairs, in file order) against `query`.
pub fn rank_paragraphs<'a, I>(documents: I, query: &str, policy: &ContentPolicy) -> Vec<ScoredParagraph>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let query_words = word_set(query);
    let mut scored = Vec::new();

    for (source, content) in documents {
        for paragraph in content.split("\n\n").map(str::trim) {
            if paragraph.chars().count() < policy.min_paragraph_chars {
                continue;
            }

            let score = word_set(paragraph).intersection(&query_words).count();
            if score == 0 {
                continue;
            }

            scored.push(ScoredParagraph {
                score,
                text: paragraph.chars().take(policy.snippet_chars).collect(),
                source: source.to_string(),
            });
        }
    }

    // Stable: equal scores keep encounter order.
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

/// Render the top `max_results` paragraphs, each labeled with its source file.
pub fn format_results(ranked: &[ScoredParagraph], max_results: usize) -> Option<String> {
    let blocks: Vec<String> = ranked
        .iter()
        .take(max_results)
        .map(|hit| format!("[From: {}]\n{}", hit.source, hit.text))
        .collect();

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join(RESULT_SEPARATOR))
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Fallback search over a conversation's stored documents.
#[derive(Debug, Clone)]
pub struct FallbackSearch {
    workspace: Arc<WorkspaceManager>,
    policy: ContentPolicy,
}

impl FallbackSearch {
    /// Create a search engine reading from `workspace`.
    pub fn new(workspace: Arc<WorkspaceManager>, policy: ContentPolicy) -> Self {
        Self { workspace, policy }
    }

    /// Best-matching paragraphs for `query`, or `None` when nothing overlaps.
    ///
    /// Unreadable files are skipped with a warning.
    pub fn search(&self, id: Uuid, query: &str, max_results: usize) -> Option<String> {
        let files = match self.workspace.text_files(id) {
            Ok(files) => files,
            Err(error) => {
                tracing::warn!(conversation_id = %id, error = %error, "Cannot list documents for fallback search");
                return None;
            }
        };

        let documents: Vec<(String, String)> = files
            .iter()
            .filter_map(|path| match read_text(path) {
                Ok(content) => Some((file_name(path), content)),
                Err(error) => {
                    tracing::warn!(conversation_id = %id, error = %error, "Skipping unreadable document");
                    None
                }
            })
            .collect();

        let ranked = rank_paragraphs(
            documents
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_str())),
            query,
            &self.policy,
        );
        let result = format_results(&ranked, max_results)?;
        tracing::info!(
            conversation_id = %id,
            matches = ranked.len().min(max_results),
            "Fallback search found relevant paragraphs"
        );
        Some(result)
    }
}
