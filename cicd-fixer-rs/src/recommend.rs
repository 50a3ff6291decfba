// cicd-fixer-rs/src/recommend.rs
// Fix recommendation from the approved-fix corpus: adapt a near-identical
// historical fix, annotate a caller-supplied base fix, or assemble one from
// commands seen in similar fixes.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::predictor::{PredictionResult, SuccessPredictor};
use crate::similarity::{SimilarFix, SimilarityMatcher};

/// Top score above which the historical fix is reused directly.
const ADAPT_THRESHOLD: f64 = 0.7;
const PACKAGE_MANAGERS: [&str; 6] = ["npm", "pip", "apt", "yarn", "mvn", "gradle"];
const MAX_PATTERN_LINES: usize = 5;
const NO_PATTERN_FIX: &str = "# No similar patterns found\n# Manual investigation recommended\n# Check error logs and repository documentation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    AdaptedFromSimilar,
    EnhancedBase,
    PatternBased,
    Fallback,
}

impl GenerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStrategy::AdaptedFromSimilar => "adapted_from_similar",
            GenerationStrategy::EnhancedBase => "enhanced_base",
            GenerationStrategy::PatternBased => "pattern_based",
            GenerationStrategy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Medium,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::VeryHigh
        } else if score >= 0.6 {
            ConfidenceLevel::High
        } else if score >= 0.4 {
            ConfidenceLevel::Medium
        } else if score >= 0.2 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfidenceLevel::VeryHigh => "Very High",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::VeryLow => "Very Low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedFix {
    pub recommended_fix: String,
    pub generation_strategy: GenerationStrategy,
    pub similar_fixes_found: usize,
    pub top_similar_fixes: Vec<SimilarFix>,
    pub success_prediction: PredictionResult,
    pub confidence_level: ConfidenceLevel,
    pub enhancement_notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Substitute `<owner>` / `<repo>` placeholders and append an adaptation note.
pub fn adapt_historical_fix(historical_fix: &str, repo_context: &str) -> String {
    let adapted = match repo_context.split_once('/') {
        Some((owner, repo)) => historical_fix
            .replace("<repo>", repo)
            .replace("<owner>", owner),
        None => historical_fix.to_string(),
    };
    format!(
        "{adapted}\n\n# Adapted from similar fix in repository context\n# Context: {repo_context}"
    )
}

/// Append the repositories (at most two) the supporting matches came from.
pub fn enhance_base_fix(base_fix: &str, matches: &[SimilarFix]) -> String {
    if matches.is_empty() {
        return base_fix.to_string();
    }
    let mut out = format!(
        "{base_fix}\n\n# Enhanced with insights from {} similar cases\n# Additional considerations based on historical patterns:\n",
        matches.len()
    );
    for (i, m) in matches.iter().take(2).enumerate() {
        out.push_str(&format!(
            "# {}. From {} (similarity: {:.2})\n",
            i + 1,
            m.repository,
            m.similarity_score
        ));
    }
    out
}

/// Package-manager command lines from the top three matches, first
/// occurrence wins, at most five.
pub fn package_manager_lines(matches: &[SimilarFix]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for m in matches.iter().take(3) {
        for line in m.historical_fix.lines() {
            let lowered = line.to_lowercase();
            if !PACKAGE_MANAGERS.iter().any(|pm| lowered.contains(pm)) {
                continue;
            }
            let line = line.trim().to_string();
            if seen.insert(line.clone()) {
                lines.push(line);
                if lines.len() == MAX_PATTERN_LINES {
                    return lines;
                }
            }
        }
    }
    lines
}

pub fn generate_from_patterns(matches: &[SimilarFix]) -> String {
    if matches.is_empty() {
        return NO_PATTERN_FIX.to_string();
    }

    let mut out = String::from("# Generated from similar patterns:\n\n");
    let lines = package_manager_lines(matches);
    if !lines.is_empty() {
        out.push_str("# Common fix patterns identified:\n");
        for line in lines {
            out.push_str(&format!("# {line}\n"));
        }
    }
    out.push_str("\n# Recommended action based on patterns:\n");
    out.push_str("# 1. Review the error log for specific failure points\n");
    out.push_str("# 2. Check dependency versions and compatibility\n");
    out.push_str("# 3. Verify configuration files\n");
    out
}

fn enhancement_notes(strategy: GenerationStrategy, matches: &[SimilarFix]) -> Vec<String> {
    let mut notes = Vec::new();
    match strategy {
        GenerationStrategy::AdaptedFromSimilar => {
            if let Some(top) = matches.first() {
                notes.push(format!(
                    "Adapted from highly similar fix (top match: {:.2} similarity)",
                    top.similarity_score
                ));
            }
        }
        GenerationStrategy::EnhancedBase => notes.push(format!(
            "Enhanced base fix with insights from {} similar cases",
            matches.len()
        )),
        GenerationStrategy::PatternBased => notes.push(format!(
            "Generated from learned patterns across {} similar fixes",
            matches.len()
        )),
        GenerationStrategy::Fallback => {}
    }

    if !matches.is_empty() {
        let repos: HashSet<&str> = matches.iter().map(|m| m.repository.as_str()).collect();
        notes.push(format!(
            "Drew insights from {} different repositories",
            repos.len()
        ));
    }
    notes
}

pub struct FixRecommender {
    matcher: SimilarityMatcher,
    predictor: SuccessPredictor,
    min_similarity: f64,
}

impl FixRecommender {
    /// `min_similarity` is the raw-score threshold for historical matches,
    /// the same one `find_similar` is configured with.
    pub fn new(matcher: SimilarityMatcher, predictor: SuccessPredictor, min_similarity: f64) -> Self {
        Self { matcher, predictor, min_similarity }
    }

    /// Recommend a fix for `error_text`. A failed corpus lookup degrades to
    /// the base fix with the fallback prediction.
    #[instrument(name = "enhance_fix", skip(self, error_text, base_fix))]
    pub async fn recommend(
        &self,
        error_text: &str,
        repo_context: &str,
        base_fix: Option<&str>,
    ) -> EnhancedFix {
        let matches = match self
            .matcher
            .try_find_similar(error_text, repo_context, self.min_similarity)
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                tracing::error!(error = %err, "enhanced fix generation failed");
                let prediction = PredictionResult::fallback(err.to_string());
                return EnhancedFix {
                    recommended_fix: base_fix
                        .unwrap_or("# Unable to generate enhanced fix")
                        .to_string(),
                    generation_strategy: GenerationStrategy::Fallback,
                    similar_fixes_found: 0,
                    top_similar_fixes: Vec::new(),
                    confidence_level: ConfidenceLevel::from_score(prediction.confidence),
                    success_prediction: prediction,
                    enhancement_notes: Vec::new(),
                    error: Some(err.to_string()),
                };
            }
        };

        let (strategy, recommended_fix) = match (matches.first(), base_fix) {
            (Some(top), _) if top.similarity_score > ADAPT_THRESHOLD => (
                GenerationStrategy::AdaptedFromSimilar,
                adapt_historical_fix(&top.historical_fix, repo_context),
            ),
            (_, Some(base)) => (
                GenerationStrategy::EnhancedBase,
                enhance_base_fix(base, &matches),
            ),
            _ => (
                GenerationStrategy::PatternBased,
                generate_from_patterns(&matches),
            ),
        };

        let prediction = self
            .predictor
            .predict(error_text, &recommended_fix, repo_context)
            .await;
        tracing::info!(
            strategy = strategy.as_str(),
            matches = matches.len(),
            probability = prediction.predicted_success_rate,
            "enhanced fix generated"
        );

        EnhancedFix {
            recommended_fix,
            generation_strategy: strategy,
            similar_fixes_found: matches.len(),
            top_similar_fixes: matches.iter().take(3).cloned().collect(),
            confidence_level: ConfidenceLevel::from_score(prediction.confidence),
            success_prediction: prediction,
            enhancement_notes: enhancement_notes(strategy, &matches),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(score: f64, repo: &str, text: &str) -> SimilarFix {
        SimilarFix {
            similarity_score: score,
            historical_fix: text.to_string(),
            repository: repo.to_string(),
            date: None,
            error_pattern: String::new(),
        }
    }

    #[test]
    fn confidence_levels_have_inclusive_lower_bounds() {
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_score(0.6), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.59), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.2), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::VeryLow);
        assert_eq!(ConfidenceLevel::VeryHigh.to_string(), "Very High");
    }

    #[test]
    fn adaptation_fills_placeholders() {
        let adapted = adapt_historical_fix("git clone <owner>/<repo>", "acme/widgets");
        assert!(adapted.starts_with("git clone acme/widgets"));
        assert!(adapted.contains("# Context: acme/widgets"));
    }

    #[test]
    fn base_fix_names_two_sources_at_most() {
        let matches = vec![
            fix(0.6, "acme/a", "x"),
            fix(0.5, "acme/b", "y"),
            fix(0.4, "acme/c", "z"),
        ];
        let enhanced = enhance_base_fix("npm ci", &matches);
        assert!(enhanced.contains("3 similar cases"));
        assert!(enhanced.contains("From acme/b (similarity: 0.50)"));
        assert!(!enhanced.contains("acme/c"));
        assert_eq!(enhance_base_fix("npm ci", &[]), "npm ci");
    }

    #[test]
    fn package_lines_are_deduplicated_and_capped() {
        let matches = vec![
            fix(0.6, "a/a", "npm install\n  npm install  \npip install x\ncargo build"),
            fix(0.5, "a/b", "yarn add a\nyarn add b\nmvn verify\ngradle build\napt-get update"),
            fix(0.4, "a/c", "npm run late"),
        ];
        let lines = package_manager_lines(&matches);
        assert_eq!(
            lines,
            vec!["npm install", "pip install x", "yarn add a", "yarn add b", "mvn verify"]
        );
    }

    #[test]
    fn pattern_fix_without_matches_asks_for_investigation() {
        assert!(generate_from_patterns(&[]).contains("Manual investigation"));
    }
}
