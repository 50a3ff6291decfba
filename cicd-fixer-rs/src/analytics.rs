// cicd-fixer-rs/src/analytics.rs
// Read-only aggregate statistics over failures, suggestions and learned
// patterns. Nothing here feeds back into matching or prediction.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::classifier::{ErrorClassifier, detect_project_language};
use crate::model::{FailureRecord, FeedbackOutcome, FixStatus, FixSuggestion};
use crate::pattern_store::LearnedPattern;
use crate::repository::{FixRepository, RepositoryError};

/// Insertion-ordered counter; `most_common` breaks ties by first sighting.
#[derive(Debug, Clone)]
struct Tally<K> {
    index: HashMap<K, usize>,
    counts: Vec<(K, usize)>,
}

impl<K: Clone + Eq + Hash> Tally<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            counts: Vec::new(),
        }
    }

    fn add(&mut self, key: K) {
        match self.index.get(&key) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(key.clone(), self.counts.len());
                self.counts.push((key, 1));
            }
        }
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn most_common(&self, n: usize) -> Vec<(K, usize)> {
        let mut sorted = self.counts.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(n);
        sorted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoFixStats {
    pub success_rate: f64,
    pub total_fixes: usize,
    pub approved_fixes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailurePatterns {
    pub most_failing_repos: Vec<(String, usize)>,
    pub common_error_types: Vec<(String, usize)>,
    /// Failures per UTC hour of day.
    pub failure_time_distribution: BTreeMap<u32, usize>,
    pub fix_success_rates: BTreeMap<String, RepoFixStats>,
    pub language_distribution: Vec<(String, usize)>,
    pub total_unique_repos: usize,
    pub total_error_types: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePatternReport {
    pub analysis_period: String,
    pub total_runs: usize,
    pub patterns: FailurePatterns,
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailurePatternReport {
    fn empty(days_back: i64, summary: Option<String>, error: Option<String>) -> Self {
        Self {
            analysis_period: format!("Last {days_back} days"),
            total_runs: 0,
            patterns: FailurePatterns::default(),
            recommendations: Vec::new(),
            analyzed_at: Utc::now(),
            summary,
            error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallFixStats {
    pub total_fixes: usize,
    pub approved_fixes: usize,
    pub rejected_fixes: usize,
    pub pending_fixes: usize,
    pub approval_rate: f64,
    pub rejection_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryEffectiveness {
    pub total_fixes: usize,
    pub approval_rate: f64,
    pub rejection_rate: f64,
    pub pending_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixEffectivenessReport {
    pub overall_stats: OverallFixStats,
    pub effectiveness_by_type: BTreeMap<String, CategoryEffectiveness>,
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentFix {
    pub fix_preview: String,
    pub status: FixStatus,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: DateTime<Utc>,
    pub successful: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryProfile {
    pub repository: String,
    pub total_runs: usize,
    pub most_failing_workflows: Vec<(String, usize)>,
    pub common_error_types: Vec<(String, usize)>,
    pub recent_fixes: Vec<RecentFix>,
    pub success_rate: f64,
    pub success_trend: Vec<TrendPoint>,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessBands {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeBands {
    pub recent: usize,
    pub moderate: usize,
    pub old: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternInsights {
    pub total_learned_patterns: usize,
    pub patterns_by_success_rate: SuccessBands,
    pub most_common_repos: Vec<(String, usize)>,
    pub pattern_age_distribution: AgeBands,
}

/// Summarize learned patterns by success band, repository and age.
pub fn pattern_insights(patterns: &[LearnedPattern], now: DateTime<Utc>) -> PatternInsights {
    let mut insights = PatternInsights {
        total_learned_patterns: patterns.len(),
        ..Default::default()
    };
    let mut repos = Tally::new();

    for pattern in patterns {
        if pattern.success_rate >= 0.8 {
            insights.patterns_by_success_rate.high += 1;
        } else if pattern.success_rate >= 0.5 {
            insights.patterns_by_success_rate.medium += 1;
        } else {
            insights.patterns_by_success_rate.low += 1;
        }

        for repo in &pattern.repo_contexts {
            repos.add(repo.clone());
        }

        let days_old = (now - pattern.last_updated).num_days();
        if days_old <= 7 {
            insights.pattern_age_distribution.recent += 1;
        } else if days_old <= 30 {
            insights.pattern_age_distribution.moderate += 1;
        } else {
            insights.pattern_age_distribution.old += 1;
        }
    }

    insights.most_common_repos = repos.most_common(10);
    insights
}

fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Aggregate statistics engine.
pub struct PatternAnalyzer {
    repo: Arc<dyn FixRepository + Send + Sync>,
    classifier: Arc<dyn ErrorClassifier + Send + Sync>,
}

impl PatternAnalyzer {
    pub fn new(
        repo: Arc<dyn FixRepository + Send + Sync>,
        classifier: Arc<dyn ErrorClassifier + Send + Sync>,
    ) -> Self {
        Self { repo, classifier }
    }

    async fn suggestions_by_id(&self) -> Result<HashMap<String, FixSuggestion>, RepositoryError> {
        Ok(self
            .repo
            .list_suggestions()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect())
    }

    /// Failure patterns over the last `days_back` days.
    #[instrument(name = "analyze_failure_patterns", skip(self))]
    pub async fn analyze_failure_patterns(&self, days_back: i64) -> FailurePatternReport {
        let Some(cutoff) =
            TimeDelta::try_days(days_back).and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            tracing::warn!(days_back, "analysis window out of range");
            return FailurePatternReport::empty(
                days_back,
                None,
                Some(format!("analysis window of {days_back} days is out of range")),
            );
        };

        match self.try_analyze_failure_patterns(days_back, cutoff).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "error analyzing failure patterns");
                FailurePatternReport::empty(days_back, None, Some(err.to_string()))
            }
        }
    }

    async fn try_analyze_failure_patterns(
        &self,
        days_back: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<FailurePatternReport, RepositoryError> {
        let runs = self.repo.failures_since(cutoff).await?;
        if runs.is_empty() {
            return Ok(FailurePatternReport::empty(
                days_back,
                Some("No workflow runs found in the specified period".to_string()),
                None,
            ));
        }

        let suggestions = self.suggestions_by_id().await?;
        let patterns = self.extract_patterns(&runs, &suggestions);
        Ok(FailurePatternReport {
            analysis_period: format!("Last {days_back} days"),
            total_runs: runs.len(),
            recommendations: pattern_recommendations(&patterns),
            patterns,
            analyzed_at: Utc::now(),
            summary: None,
            error: None,
        })
    }

    fn extract_patterns(
        &self,
        runs: &[FailureRecord],
        suggestions: &HashMap<String, FixSuggestion>,
    ) -> FailurePatterns {
        let mut repo_failures = Tally::new();
        let mut error_types = Tally::new();
        let mut languages = Tally::new();
        let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
        let mut fix_counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();

        for run in runs {
            let repository = run.repository();
            repo_failures.add(repository.clone());

            for category in self.classifier.classify(run.error_text()) {
                error_types.add(category.as_str().to_string());
            }

            *hours.entry(run.created_at.hour()).or_default() += 1;

            if let Some(decision) = suggestions.get(&run.id).and_then(|s| s.status.decision()) {
                let entry = fix_counts.entry(repository).or_default();
                entry.1 += 1;
                if decision == FeedbackOutcome::Approved {
                    entry.0 += 1;
                }
            }

            if let Some(language) = detect_project_language(&run.repo, run.error_text()) {
                languages.add(language.to_string());
            }
        }

        let fix_success_rates = fix_counts
            .into_iter()
            .map(|(repo, (approved, total))| {
                (
                    repo,
                    RepoFixStats {
                        success_rate: rate(approved, total),
                        total_fixes: total,
                        approved_fixes: approved,
                    },
                )
            })
            .collect();

        FailurePatterns {
            most_failing_repos: repo_failures.most_common(10),
            common_error_types: error_types.most_common(15),
            failure_time_distribution: hours,
            fix_success_rates,
            language_distribution: languages.most_common(10),
            total_unique_repos: repo_failures.len(),
            total_error_types: error_types.len(),
        }
    }

    /// Approval statistics over every stored suggestion.
    #[instrument(name = "fix_effectiveness", skip(self))]
    pub async fn fix_effectiveness(&self) -> FixEffectivenessReport {
        match self.repo.list_suggestions().await {
            Ok(suggestions) => self.effectiveness_of(&suggestions),
            Err(err) => {
                tracing::error!(error = %err, "error computing fix effectiveness");
                FixEffectivenessReport {
                    error: Some(err.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    fn effectiveness_of(&self, suggestions: &[FixSuggestion]) -> FixEffectivenessReport {
        let mut overall = OverallFixStats::default();
        // (approved, rejected, pending) per primary category.
        let mut by_type: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();

        for s in suggestions {
            overall.total_fixes += 1;
            let label = self
                .classifier
                .primary(&s.error_text)
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let entry = by_type.entry(label).or_default();

            match s.status.decision() {
                Some(FeedbackOutcome::Approved) => {
                    overall.approved_fixes += 1;
                    entry.0 += 1;
                }
                Some(_) => {
                    overall.rejected_fixes += 1;
                    entry.1 += 1;
                }
                None => {
                    overall.pending_fixes += 1;
                    entry.2 += 1;
                }
            }
        }

        overall.approval_rate = rate(overall.approved_fixes, overall.total_fixes);
        overall.rejection_rate = rate(overall.rejected_fixes, overall.total_fixes);

        let effectiveness_by_type = by_type
            .into_iter()
            .map(|(label, (approved, rejected, pending))| {
                let total = approved + rejected + pending;
                (
                    label,
                    CategoryEffectiveness {
                        total_fixes: total,
                        approval_rate: rate(approved, total),
                        rejection_rate: rate(rejected, total),
                        pending_rate: rate(pending, total),
                    },
                )
            })
            .collect();

        FixEffectivenessReport {
            overall_stats: overall,
            effectiveness_by_type,
            generated_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Per-repository knowledge profile.
    #[instrument(name = "repository_profile", skip(self))]
    pub async fn repository_profile(&self, owner: &str, repo: &str) -> RepositoryProfile {
        let repository = format!("{owner}/{repo}");
        match self.try_repository_profile(&repository).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::error!(error = %err, "error building repository profile");
                RepositoryProfile {
                    repository,
                    total_runs: 0,
                    most_failing_workflows: Vec::new(),
                    common_error_types: Vec::new(),
                    recent_fixes: Vec::new(),
                    success_rate: 0.0,
                    success_trend: Vec::new(),
                    recommendations: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn try_repository_profile(
        &self,
        repository: &str,
    ) -> Result<RepositoryProfile, RepositoryError> {
        let mut runs: Vec<FailureRecord> = self
            .repo
            .list_failures()
            .await?
            .into_iter()
            .filter(|f| f.repository() == repository)
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let suggestions = self.suggestions_by_id().await?;

        let mut workflows = Tally::new();
        let mut error_types = Tally::new();
        let mut recent_fixes = Vec::new();
        let mut success_trend = Vec::new();

        for run in &runs {
            workflows.add(run.workflow_name.clone());
            for category in self.classifier.classify(run.error_text()) {
                error_types.add(category.as_str().to_string());
            }

            let suggestion = suggestions.get(&run.id);
            if let Some(s) = suggestion {
                if recent_fixes.len() < 10 {
                    recent_fixes.push(RecentFix {
                        fix_preview: s.fix_preview(100),
                        status: s.status,
                        date: s.created_at,
                    });
                }
            }
            if success_trend.len() < 30 {
                success_trend.push(TrendPoint {
                    date: run.created_at,
                    successful: suggestion.is_some_and(|s| s.status == FixStatus::Applied),
                });
            }
        }

        let successful = success_trend.iter().filter(|p| p.successful).count();
        let success_rate = rate(successful, success_trend.len());
        let most_failing_workflows = workflows.most_common(5);
        let common_error_types = error_types.most_common(10);

        Ok(RepositoryProfile {
            repository: repository.to_string(),
            total_runs: runs.len(),
            recommendations: repository_recommendations(
                &most_failing_workflows,
                &common_error_types,
                success_rate,
                runs.is_empty(),
            ),
            most_failing_workflows,
            common_error_types,
            recent_fixes,
            success_rate,
            success_trend,
            error: None,
        })
    }
}

fn pattern_recommendations(patterns: &FailurePatterns) -> Vec<String> {
    let mut out = Vec::new();

    if let Some((repo, count)) = patterns.most_failing_repos.first() {
        out.push(format!(
            "Consider creating specialized fix templates for {repo} which has {count} failures"
        ));
    }
    if let Some((error_type, count)) = patterns.common_error_types.first() {
        out.push(format!(
            "Focus on improving {error_type} detection and fixes - appears in {count} failures"
        ));
    }

    let mut peak: Option<(u32, usize)> = None;
    for (&hour, &count) in &patterns.failure_time_distribution {
        if peak.is_none_or(|(_, best)| count > best) {
            peak = Some((hour, count));
        }
    }
    if let Some((hour, count)) = peak {
        out.push(format!(
            "Most failures occur at {hour:02}:00 UTC ({count} failures) - consider proactive monitoring"
        ));
    }

    if let Some((language, _)) = patterns.language_distribution.first() {
        out.push(format!(
            "Enhance {language} specific error detection and fix generation"
        ));
    }

    let low: Vec<&str> = patterns
        .fix_success_rates
        .iter()
        .filter(|(_, s)| s.success_rate < 0.5 && s.total_fixes >= 3)
        .map(|(repo, _)| repo.as_str())
        .collect();
    if !low.is_empty() {
        out.push(format!(
            "Improve fix quality for repositories with low success rates: {}",
            low.join(", ")
        ));
    }

    out
}

fn repository_recommendations(
    workflows: &[(String, usize)],
    error_types: &[(String, usize)],
    success_rate: f64,
    no_runs: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    if no_runs {
        return out;
    }

    if let Some((workflow, count)) = workflows.first() {
        out.push(format!(
            "Focus on stabilizing '{workflow}' workflow ({count} failures)"
        ));
    }
    if let Some((error_type, count)) = error_types.first() {
        out.push(format!(
            "Address recurring {error_type} issues ({count} occurrences)"
        ));
    }

    let pct = success_rate * 100.0;
    if success_rate < 0.7 {
        out.push(format!(
            "Success rate is {pct:.1}% - consider implementing more robust testing and error prevention"
        ));
    } else if success_rate > 0.9 {
        out.push(format!(
            "Excellent success rate of {pct:.1}% - consider sharing best practices with other repositories"
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn pattern(rate: f64, repos: &[&str], age_days: i64, now: DateTime<Utc>) -> LearnedPattern {
        LearnedPattern {
            error_signature: format!("sig-{rate}-{age_days}"),
            fix_template: "t".to_string(),
            success_rate: rate,
            usage_count: 1,
            repo_contexts: repos.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
            last_updated: now - TimeDelta::days(age_days),
        }
    }

    #[test]
    fn tally_breaks_ties_by_first_sighting() {
        let mut t = Tally::new();
        for k in ["b", "a", "b", "a", "c"] {
            t.add(k);
        }
        assert_eq!(t.most_common(2), vec![("b", 2), ("a", 2)]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn insights_band_patterns() {
        let now = Utc::now();
        let patterns = vec![
            pattern(0.95, &["acme/a"], 1, now),
            pattern(0.6, &["acme/a", "acme/b"], 10, now),
            pattern(0.2, &["acme/c"], 90, now),
        ];
        let insights = pattern_insights(&patterns, now);

        assert_eq!(insights.total_learned_patterns, 3);
        assert_eq!(
            insights.patterns_by_success_rate,
            SuccessBands {
                high: 1,
                medium: 1,
                low: 1
            }
        );
        assert_eq!(
            insights.pattern_age_distribution,
            AgeBands {
                recent: 1,
                moderate: 1,
                old: 1
            }
        );
        assert_eq!(insights.most_common_repos[0], ("acme/a".to_string(), 2));
    }

    #[test]
    fn repository_recommendations_reflect_success_rate() {
        let workflows = vec![("CI".to_string(), 4)];
        let low = repository_recommendations(&workflows, &[], 0.25, false);
        assert!(low.iter().any(|r| r.contains("25.0%")));
        let high = repository_recommendations(&workflows, &[], 0.95, false);
        assert!(high.iter().any(|r| r.contains("Excellent")));
        assert!(repository_recommendations(&[], &[], 0.0, true).is_empty());
    }
}
