// cicd-fixer-rs/src/analysis.rs
// Failure ingestion: persist the failure, ask the analysis collaborator for a
// fix, and store the result as a pending suggestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::classifier::{ErrorCategory, ErrorClassifier};
use crate::collaborators::{FailureAnalyzer, with_timeout};
use crate::model::{AnalysisState, FailureEvent, FailureRecord, FixStatus, FixSuggestion};
use crate::predictor::assess_fix_complexity;
use crate::repository::{FixRepository, RepositoryError};

/// Result of analyzing one failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Suggested { suggestion: FixSuggestion },
    NoSuggestion { failure_id: String, reason: String },
}

impl AnalysisOutcome {
    pub fn suggestion(&self) -> Option<&FixSuggestion> {
        match self {
            AnalysisOutcome::Suggested { suggestion } => Some(suggestion),
            AnalysisOutcome::NoSuggestion { .. } => None,
        }
    }

    pub fn failure_id(&self) -> &str {
        match self {
            AnalysisOutcome::Suggested { suggestion } => &suggestion.id,
            AnalysisOutcome::NoSuggestion { failure_id, .. } => failure_id,
        }
    }
}

#[derive(Clone)]
pub struct AnalysisPipeline {
    repo: Arc<dyn FixRepository + Send + Sync>,
    analyzer: Arc<dyn FailureAnalyzer + Send + Sync>,
    classifier: Arc<dyn ErrorClassifier + Send + Sync>,
    timeout: Duration,
}

impl AnalysisPipeline {
    pub fn new(
        repo: Arc<dyn FixRepository + Send + Sync>,
        analyzer: Arc<dyn FailureAnalyzer + Send + Sync>,
        classifier: Arc<dyn ErrorClassifier + Send + Sync>,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            analyzer,
            classifier,
            timeout,
        }
    }

    /// Record the failure and analyze it.
    ///
    /// Collaborator failures and timeouts are recorded on the failure as
    /// `NoSuggestion`; only store errors surface.
    #[instrument(
        name = "analyze_failure",
        skip(self, event),
        fields(owner = %event.owner, repo = %event.repo, run_id = event.run_id)
    )]
    pub async fn run(&self, event: &FailureEvent) -> Result<AnalysisOutcome, RepositoryError> {
        let mut record = FailureRecord::from_event(Uuid::new_v4().to_string(), event);
        self.repo.insert_failure(&record).await?;

        let report = match with_timeout(self.timeout, self.analyzer.analyze(&record)).await {
            Ok(report) => report.validated(),
            Err(err) => {
                tracing::error!(failure.id = %record.id, error = %err, "analysis collaborator failed");
                metrics::increment_counter!("cicd_fixer_analysis_failures_total");
                return self.settle_without_fix(&mut record, err.to_string()).await;
            }
        };

        let Some(fix) = report.suggested_fix.clone() else {
            tracing::info!(failure.id = %record.id, "no fix suggested");
            return self
                .settle_without_fix(&mut record, "no fix suggested".to_string())
                .await;
        };

        let fix_text = fix.render();
        let error_category = self.classifier.primary(record.error_text()).or_else(|| {
            report
                .error_type
                .as_deref()
                .and_then(ErrorCategory::from_label)
        });
        let now = Utc::now();
        let suggestion = FixSuggestion {
            id: record.id.clone(),
            owner: record.owner.clone(),
            repo: record.repo.clone(),
            workflow_name: record.workflow_name.clone(),
            error_text: record.error_text().to_string(),
            complexity: assess_fix_complexity(&fix_text),
            fix_text,
            structured_fix: Some(fix),
            status: FixStatus::Pending,
            confidence: report.confidence,
            error_category,
            branch_name: None,
            pull_request_url: None,
            files_changed: Vec::new(),
            error_message: None,
            application_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        self.repo.upsert_suggestion(&suggestion).await?;

        record.analysis = AnalysisState::Suggested {
            suggestion_id: suggestion.id.clone(),
        };
        record.updated_at = now;
        self.repo.update_failure(&record).await?;

        metrics::increment_counter!("cicd_fixer_suggestions_created_total");
        tracing::info!(
            failure.id = %record.id,
            category = ?suggestion.error_category,
            confidence = suggestion.confidence,
            "fix suggestion stored as pending"
        );

        Ok(AnalysisOutcome::Suggested { suggestion })
    }

    async fn settle_without_fix(
        &self,
        record: &mut FailureRecord,
        reason: String,
    ) -> Result<AnalysisOutcome, RepositoryError> {
        record.analysis = AnalysisState::NoSuggestion {
            reason: reason.clone(),
        };
        record.updated_at = Utc::now();
        self.repo.update_failure(record).await?;

        Ok(AnalysisOutcome::NoSuggestion {
            failure_id: record.id.clone(),
            reason,
        })
    }
}
