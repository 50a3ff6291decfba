// cicd-fixer-rs/src/predictor.rs
// Weighted success prediction for a proposed fix.
//
// Five factors, each in [0, 1], are blended with fixed weights. Confidence is
// a data-availability proxy (how many matches and whether the repository has
// any decided fixes), not a statistical interval.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::classifier::{ErrorClassifier, RegexErrorClassifier};
use crate::repository::{DecisionCounts, FixRepository, RepositoryError};
use crate::similarity::{SimilarFix, SimilarityMatcher};

/// Threshold the predictor uses when looking for similar fixes.
pub const PREDICTION_MIN_SIMILARITY: f64 = 0.2;
const TOP_MATCHES: usize = 5;
const DEFAULT_REPO_HISTORY: f64 = 0.5;
const UNCATEGORIZED_RELIABILITY: f64 = 0.5;
/// Placeholder until a real temporal signal exists.
const TIME_CONTEXT: f64 = 0.8;

pub const FALLBACK_PROBABILITY: f64 = 0.5;
pub const FALLBACK_CONFIDENCE: f64 = 0.1;

const W_SIMILARITY: f64 = 0.30;
const W_REPO_HISTORY: f64 = 0.25;
const W_COMPLEXITY: f64 = 0.20;
const W_ERROR_TYPE: f64 = 0.15;
const W_TIME: f64 = 0.10;

static CONFIG_FILE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(json|yaml|yml|xml|config)").expect("valid regex"));
static DEPENDENCY_VERB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(install|upgrade|add.*dependency)").expect("valid regex"));

/// Per-factor breakdown, each normalized to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionFactors {
    pub similarity_match: f64,
    pub repo_history: f64,
    /// `1 - complexity`: simpler fixes score higher.
    pub fix_complexity: f64,
    pub error_type_reliability: f64,
    pub time_context: f64,
}

impl PredictionFactors {
    pub fn weighted_sum(&self) -> f64 {
        self.similarity_match * W_SIMILARITY
            + self.repo_history * W_REPO_HISTORY
            + self.fix_complexity * W_COMPLEXITY
            + self.error_type_reliability * W_ERROR_TYPE
            + self.time_context * W_TIME
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_success_rate: f64,
    pub confidence: f64,
    pub factors: PredictionFactors,
    pub recommendations: Vec<String>,
    pub similar_fixes_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictionResult {
    /// Interpretable answer when the inputs could not be gathered.
    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            predicted_success_rate: FALLBACK_PROBABILITY,
            confidence: FALLBACK_CONFIDENCE,
            factors: PredictionFactors::default(),
            recommendations: Vec::new(),
            similar_fixes_found: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Complexity of a fix text: 0 is trivial, 1 is as complex as it gets.
///
/// Empty text counts as maximally complex.
pub fn assess_fix_complexity(fix_text: &str) -> f64 {
    if fix_text.is_empty() {
        return 1.0;
    }
    let lowered = fix_text.to_lowercase();

    let signals = [
        (fix_text.split('\n').count() as f64 / 50.0, 0.30),
        (fix_text.matches("file:").count() as f64 / 10.0, 0.20),
        (lowered.matches("delete").count() as f64 / 5.0, 0.15),
        (CONFIG_FILE_MENTION.find_iter(&lowered).count() as f64 / 5.0, 0.20),
        (DEPENDENCY_VERB.find_iter(&lowered).count() as f64 / 3.0, 0.15),
    ];

    signals
        .iter()
        .map(|(value, weight)| value.min(1.0) * weight)
        .sum::<f64>()
        .min(1.0)
}

/// Prior reliability of the log's primary error category.
pub fn error_type_reliability(classifier: &dyn ErrorClassifier, error_text: &str) -> f64 {
    classifier
        .primary(error_text)
        .map(|c| c.prior_reliability())
        .unwrap_or(UNCATEGORIZED_RELIABILITY)
}

/// `min(1, 0.4 * matches/10 + 0.3 * has_history + 0.3)`.
pub fn prediction_confidence(match_count: usize, repo_has_history: bool) -> f64 {
    let history = if repo_has_history { 1.0 } else { 0.0 };
    (0.4 * (match_count as f64 / 10.0) + 0.3 * history + 0.3).min(1.0)
}

fn mean_top_score(matches: &[SimilarFix]) -> f64 {
    let top: Vec<f64> = matches
        .iter()
        .take(TOP_MATCHES)
        .map(|m| m.similarity_score)
        .collect();
    if top.is_empty() {
        0.0
    } else {
        top.iter().sum::<f64>() / top.len() as f64
    }
}

/// Advisory notes; enforcement happens in the lifecycle, not here.
pub fn prediction_recommendations(factors: &PredictionFactors, probability: f64) -> Vec<String> {
    let mut out = Vec::new();

    if probability < 0.3 {
        out.push("Low success probability - consider manual review before applying".to_string());
    } else if probability > 0.8 {
        out.push("High success probability - eligible for automatic application".to_string());
    }
    if factors.similarity_match < 0.2 {
        out.push("No similar historical fixes found - proceed with caution".to_string());
    }
    if factors.fix_complexity < 0.5 {
        out.push("Complex fix detected - consider breaking into smaller changes".to_string());
    }
    if factors.repo_history < 0.3 {
        out.push("Repository has low historical fix success rate".to_string());
    }

    out
}

pub struct SuccessPredictor {
    matcher: SimilarityMatcher,
    repo: Arc<dyn FixRepository + Send + Sync>,
    classifier: Arc<dyn ErrorClassifier + Send + Sync>,
}

impl SuccessPredictor {
    pub fn new(matcher: SimilarityMatcher, repo: Arc<dyn FixRepository + Send + Sync>) -> Self {
        Self {
            matcher,
            repo,
            classifier: Arc::new(RegexErrorClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier + Send + Sync>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Predict the success of `fix_text` for `error_text` in `repo_context`.
    ///
    /// Never fails: store errors produce the 0.5 / 0.1 fallback.
    #[instrument(name = "predict_success", skip(self, error_text, fix_text))]
    pub async fn predict(
        &self,
        error_text: &str,
        fix_text: &str,
        repo_context: &str,
    ) -> PredictionResult {
        match self.try_predict(error_text, fix_text, repo_context).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "error predicting fix success; using fallback");
                PredictionResult::fallback(err.to_string())
            }
        }
    }

    async fn try_predict(
        &self,
        error_text: &str,
        fix_text: &str,
        repo_context: &str,
    ) -> Result<PredictionResult, RepositoryError> {
        let matches = self
            .matcher
            .try_find_similar(error_text, repo_context, PREDICTION_MIN_SIMILARITY)
            .await?;
        let counts: DecisionCounts = self.repo.decision_counts(repo_context).await?;

        let factors = PredictionFactors {
            similarity_match: mean_top_score(&matches),
            repo_history: counts.approval_rate().unwrap_or(DEFAULT_REPO_HISTORY),
            fix_complexity: 1.0 - assess_fix_complexity(fix_text),
            error_type_reliability: error_type_reliability(self.classifier.as_ref(), error_text),
            time_context: TIME_CONTEXT,
        };

        let probability = factors.weighted_sum().clamp(0.0, 1.0);
        let confidence = prediction_confidence(matches.len(), counts.has_history());

        tracing::debug!(
            probability,
            confidence,
            matches = matches.len(),
            "prediction computed"
        );

        Ok(PredictionResult {
            predicted_success_rate: probability,
            confidence,
            factors,
            recommendations: prediction_recommendations(&factors, probability),
            similar_fixes_found: matches.len(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let all_ones = PredictionFactors {
            similarity_match: 1.0,
            repo_history: 1.0,
            fix_complexity: 1.0,
            error_type_reliability: 1.0,
            time_context: 1.0,
        };
        assert!((all_ones.weighted_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn complexity_of_simple_and_empty_fixes() {
        assert_eq!(assess_fix_complexity(""), 1.0);
        // One line, one dependency verb.
        let simple = assess_fix_complexity("npm install react@18");
        let expected = (1.0 / 50.0) * 0.30 + (1.0 / 3.0) * 0.15;
        assert!((simple - expected).abs() < 1e-9);
    }

    #[test]
    fn complexity_signals_are_capped() {
        let heavy = format!(
            "{}\n{}\n{}\n{}",
            "line\n".repeat(80),
            "file: a.json file: b.yaml ".repeat(10),
            "delete ".repeat(10),
            "install upgrade ".repeat(5),
        );
        let c = assess_fix_complexity(&heavy);
        assert!((c - 1.0).abs() < 1e-9, "all signals saturated, got {c}");
    }

    #[test]
    fn reliability_table_and_default() {
        let classifier = RegexErrorClassifier;
        assert_eq!(error_type_reliability(&classifier, "eslint error: no-unused-vars"), 0.9);
        assert_eq!(error_type_reliability(&classifier, "job cancelled: timeout"), 0.4);
        assert_eq!(error_type_reliability(&classifier, "weird"), 0.5);
    }

    #[test]
    fn confidence_formula() {
        assert!((prediction_confidence(0, false) - 0.3).abs() < 1e-9);
        assert!((prediction_confidence(5, true) - 0.8).abs() < 1e-9);
        assert!((prediction_confidence(10, true) - 1.0).abs() < 1e-9);
        assert_eq!(prediction_confidence(1000, true), 1.0);
    }

    #[test]
    fn recommendations_follow_thresholds() {
        let weak = PredictionFactors {
            similarity_match: 0.0,
            repo_history: 0.1,
            fix_complexity: 0.2,
            error_type_reliability: 0.4,
            time_context: 0.8,
        };
        let notes = prediction_recommendations(&weak, weak.weighted_sum());
        assert_eq!(notes.len(), 4);
        assert!(notes[0].contains("manual review"));

        let strong = PredictionFactors {
            similarity_match: 1.0,
            repo_history: 1.0,
            fix_complexity: 0.9,
            error_type_reliability: 0.9,
            time_context: 0.8,
        };
        let notes = prediction_recommendations(&strong, strong.weighted_sum());
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("automatic"));
    }
}
