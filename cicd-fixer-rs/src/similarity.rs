// cicd-fixer-rs/src/similarity.rs
// Similarity matching of an incoming error against the approved-fix corpus.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::model::{HistoricalFix, truncate_with_ellipsis};
use crate::repository::{FixRepository, RepositoryError};
use crate::signature::{extract_signature, is_informative};

/// Threshold used by callers that do not pick their own.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;
/// Bonus for a candidate from the same repository as the query.
pub const REPO_MATCH_BONUS: f64 = 0.2;
pub const MAX_MATCHES: usize = 10;
/// Most-recent approved fixes scanned per query.
pub const DEFAULT_CORPUS_LIMIT: usize = 500;
const PREVIEW_CHARS: usize = 200;

/// One ranked match from the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarFix {
    pub similarity_score: f64,
    pub historical_fix: String,
    pub repository: String,
    pub date: Option<DateTime<Utc>>,
    pub error_pattern: String,
}

/// Jaccard index of the whitespace-separated, lower-cased word sets.
///
/// Two empty sets score 0.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

/// Similarity of two errors given their signatures and raw text.
///
/// Identical signatures score 1.0 unless both are the empty-text sentinel;
/// anything else falls back to word-set Jaccard over the raw logs.
pub fn similarity(sig_a: &str, sig_b: &str, text_a: &str, text_b: &str) -> f64 {
    if sig_a == sig_b && is_informative(sig_a) {
        return 1.0;
    }
    jaccard_similarity(text_a, text_b)
}

/// Score and rank `corpus` against one query. Pure; used by the matcher and
/// directly by tests.
pub fn rank_matches(
    error_text: &str,
    repo_context: &str,
    min_similarity: f64,
    corpus: &[HistoricalFix],
) -> Vec<SimilarFix> {
    let query_signature = extract_signature(error_text);

    let mut matches: Vec<SimilarFix> = corpus
        .iter()
        .filter_map(|candidate| {
            let candidate_signature = extract_signature(&candidate.error_text);
            let score = similarity(
                &query_signature,
                &candidate_signature,
                error_text,
                &candidate.error_text,
            );
            if score < min_similarity {
                return None;
            }

            let bonus = if candidate.repository == repo_context {
                REPO_MATCH_BONUS
            } else {
                0.0
            };
            Some(SimilarFix {
                similarity_score: (score + bonus).min(1.0),
                historical_fix: candidate.fix_text.clone(),
                repository: candidate.repository.clone(),
                date: candidate.created_at,
                error_pattern: truncate_with_ellipsis(&candidate.error_text, PREVIEW_CHARS),
            })
        })
        .collect();

    // Stable: equal scores keep corpus order (newest first).
    matches.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(MAX_MATCHES);
    matches
}

/// Queries the approved-fix corpus held by a `FixRepository`.
#[derive(Clone)]
pub struct SimilarityMatcher {
    repo: Arc<dyn FixRepository + Send + Sync>,
    corpus_limit: usize,
}

impl SimilarityMatcher {
    pub fn new(repo: Arc<dyn FixRepository + Send + Sync>, corpus_limit: usize) -> Self {
        Self { repo, corpus_limit }
    }

    /// Ranked matches, or the store error.
    #[instrument(name = "find_similar", skip(self, error_text))]
    pub async fn try_find_similar(
        &self,
        error_text: &str,
        repo_context: &str,
        min_similarity: f64,
    ) -> Result<Vec<SimilarFix>, RepositoryError> {
        let corpus = self.repo.recent_approved_fixes(self.corpus_limit).await?;
        let matches = rank_matches(error_text, repo_context, min_similarity, &corpus);
        tracing::debug!(
            corpus = corpus.len(),
            matches = matches.len(),
            "similarity search complete"
        );
        Ok(matches)
    }

    /// Ranked matches; an unavailable store yields no matches.
    pub async fn find_similar(
        &self,
        error_text: &str,
        repo_context: &str,
        min_similarity: f64,
    ) -> Vec<SimilarFix> {
        match self
            .try_find_similar(error_text, repo_context, min_similarity)
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                tracing::error!(error = %err, "error finding similar fixes");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(error_text: &str, fix_text: &str, repository: &str) -> HistoricalFix {
        HistoricalFix {
            error_text: error_text.to_string(),
            fix_text: fix_text.to_string(),
            repository: repository.to_string(),
            created_at: None,
        }
    }

    #[test]
    fn jaccard_edges() {
        assert_eq!(jaccard_similarity("", ""), 0.0);
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(jaccard_similarity("Alpha beta", "alpha BETA"), 1.0);
        assert!((jaccard_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn identical_signatures_score_one() {
        let text = "Error: cannot find module 'express' in /app/index.js";
        let sig = extract_signature(text);
        assert_eq!(similarity(&sig, &sig, text, text), 1.0);
    }

    #[test]
    fn fragmentless_logs_share_a_signature_and_match() {
        let npm = "npm ERR! peer dep missing: react@^18.0.0";
        let yarn = "yarn install exited with code 1";
        let (sig_npm, sig_yarn) = (extract_signature(npm), extract_signature(yarn));
        assert_eq!(sig_npm, sig_yarn);
        assert_eq!(similarity(&sig_npm, &sig_yarn, npm, yarn), 1.0);
    }

    #[test]
    fn empty_sentinel_does_not_shortcut() {
        assert_eq!(similarity("", "", "", ""), 0.0);
        assert_eq!(similarity("", "", "  ", "\n"), 0.0);
    }

    #[test]
    fn empty_corpus_yields_nothing() {
        for threshold in [0.0, 0.3, 1.0] {
            assert!(rank_matches("Error: anything at all happened", "acme/x", threshold, &[]).is_empty());
        }
    }

    #[test]
    fn repo_bonus_applies_after_threshold_and_caps() {
        let corpus = vec![
            fix("error: build step alpha beta gamma", "fix-other", "other/repo"),
            fix("error: build step alpha beta gamma", "fix-same", "acme/widgets"),
            fix("error: completely unrelated words", "fix-none", "acme/widgets"),
        ];
        let query = "error: build step alpha beta delta";
        let matches = rank_matches(query, "acme/widgets", 0.3, &corpus);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].historical_fix, "fix-same");
        assert_eq!(matches[1].historical_fix, "fix-other");
        let base = jaccard_similarity(query, "error: build step alpha beta gamma");
        assert!((matches[0].similarity_score - (base + REPO_MATCH_BONUS)).abs() < 1e-9);
        assert!((matches[1].similarity_score - base).abs() < 1e-9);
    }

    #[test]
    fn ties_keep_corpus_order_and_results_cap_at_ten() {
        let corpus: Vec<HistoricalFix> = (0..15)
            .map(|i| fix("same words every time", &format!("fix-{i}"), "other/repo"))
            .collect();
        let matches = rank_matches("same words every time", "acme/x", 0.2, &corpus);

        assert_eq!(matches.len(), MAX_MATCHES);
        let order: Vec<&str> = matches.iter().map(|m| m.historical_fix.as_str()).collect();
        assert_eq!(order[0], "fix-0");
        assert_eq!(order[9], "fix-9");
        assert!(matches.iter().all(|m| m.similarity_score <= 1.0));
    }

    #[test]
    fn long_errors_are_previewed() {
        let long_error = format!("error: {}", "x ".repeat(300));
        let corpus = vec![fix(&long_error, "f", "o/r")];
        let matches = rank_matches(&long_error, "o/r", 0.1, &corpus);
        assert_eq!(matches[0].error_pattern.chars().count(), PREVIEW_CHARS + 3);
        assert!(matches[0].error_pattern.ends_with("..."));
    }
}
