 // cicd-fixer-rs/src/model.rs
 // Records and DTOs shared by the remediation engine.
 //
 // `FailureEvent` is what a failure source (webhook or manual trigger)
 // hands over; everything else is owned by the persistence layer and
 // referenced by id from in-flight tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::ErrorCategory;

/// Failure delivered by a webhook push or a manual trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub owner: String,
    pub repo: String,
    pub run_id: u64,
    pub workflow_name: String,
    pub raw_error_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of running the analysis collaborator for one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisState {
    NotStarted,
    Suggested { suggestion_id: String },
    NoSuggestion { reason: String },
}

/// One observed CI/CD run failure. Append-only: records are updated in
/// place but never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub run_id: u64,
    pub workflow_name: String,
    pub error_text: Option<String>,
    pub analysis: AnalysisState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_event(id: impl Into<String>, event: &FailureEvent) -> Self {
        Self {
            id: id.into(),
            owner: event.owner.clone(),
            repo: event.repo.clone(),
            run_id: event.run_id,
            workflow_name: event.workflow_name.clone(),
            error_text: event.raw_error_text.clone(),
            analysis: AnalysisState::NotStarted,
            created_at: event.created_at,
            updated_at: Utc::now(),
        }
    }

    /// `owner/name` repository context.
    pub fn repository(&self) -> String {
        repository_context(&self.owner, &self.repo)
    }

    pub fn error_text(&self) -> &str {
        self.error_text.as_deref().unwrap_or_default()
    }
}

pub fn repository_context(owner: &str, repo: &str) -> String {
    format!("{owner}/{repo}")
}

/// Lifecycle status of a fix suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Approved,
    Rejected,
    Applying,
    Applied,
    ApplicationFailed,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Pending => "pending",
            FixStatus::Approved => "approved",
            FixStatus::Rejected => "rejected",
            FixStatus::Applying => "applying",
            FixStatus::Applied => "applied",
            FixStatus::ApplicationFailed => "application_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FixStatus::Rejected | FixStatus::Applied)
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(&self, target: FixStatus) -> bool {
        use FixStatus::*;
        matches!(
            (self, target),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Applying)
                | (ApplicationFailed, Applying)
                | (Applying, Applied)
                | (Applying, ApplicationFailed)
        )
    }

    /// The human decision this status implies, if one has been made.
    ///
    /// Every status downstream of `approved` still records an approval.
    pub fn decision(&self) -> Option<FeedbackOutcome> {
        match self {
            FixStatus::Pending => None,
            FixStatus::Rejected => Some(FeedbackOutcome::Rejected),
            FixStatus::Approved
            | FixStatus::Applying
            | FixStatus::Applied
            | FixStatus::ApplicationFailed => Some(FeedbackOutcome::Approved),
        }
    }

    pub fn is_approved_decision(&self) -> bool {
        self.decision() == Some(FeedbackOutcome::Approved)
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human feedback on a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Approved,
    Rejected,
    Pending,
}

impl FeedbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackOutcome::Approved => "approved",
            FeedbackOutcome::Rejected => "rejected",
            FeedbackOutcome::Pending => "pending",
        }
    }
}

/// Action requested on a suggestion through `transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    Approve,
    Reject,
    Apply,
}

impl FixAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixAction::Approve => "approve",
            FixAction::Reject => "reject",
            FixAction::Apply => "apply",
        }
    }
}

/// A proposed remediation, 1:1 with a `FailureRecord` (same id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub workflow_name: String,
    pub error_text: String,
    pub fix_text: String,
    pub structured_fix: Option<SuggestedFix>,
    pub status: FixStatus,
    pub confidence: f64,
    pub complexity: f64,
    pub error_category: Option<ErrorCategory>,
    pub branch_name: Option<String>,
    pub pull_request_url: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub application_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FixSuggestion {
    pub fn repository(&self) -> String {
        repository_context(&self.owner, &self.repo)
    }

    /// Preview of the fix text, at most `max_chars` characters plus an ellipsis.
    pub fn fix_preview(&self, max_chars: usize) -> String {
        truncate_with_ellipsis(&self.fix_text, max_chars)
    }
}

/// Approved fix from the historical corpus, as seen by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalFix {
    pub error_text: String,
    pub fix_text: String,
    pub repository: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&FixSuggestion> for HistoricalFix {
    fn from(s: &FixSuggestion) -> Self {
        Self {
            error_text: s.error_text.clone(),
            fix_text: s.fix_text.clone(),
            repository: s.repository(),
            created_at: Some(s.created_at),
        }
    }
}

/// Structured fix proposed by the analysis collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub commands_to_run: Vec<String>,
}

impl SuggestedFix {
    pub fn is_empty(&self) -> bool {
        self.description.trim().is_empty() && self.steps.is_empty() && self.commands_to_run.is_empty()
    }

    /// Text form stored on the suggestion and handed to the mutation
    /// collaborator. Empty sections are omitted.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.description.trim().is_empty() {
            out.push_str(&format!("**Description:** {}\n\n", self.description.trim()));
        }
        if !self.steps.is_empty() {
            out.push_str("**Steps:**\n");
            for (i, step) in self.steps.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, step));
            }
            out.push('\n');
        }
        if !self.files_to_modify.is_empty() {
            out.push_str("**Files to modify:**\n");
            for file in &self.files_to_modify {
                out.push_str(&format!("- file: {file}\n"));
            }
            out.push('\n');
        }
        if !self.commands_to_run.is_empty() {
            out.push_str("**Commands to run:**\n");
            for cmd in &self.commands_to_run {
                out.push_str(&format!("- `{cmd}`\n"));
            }
            out.push('\n');
        }

        out.trim().to_string()
    }
}

/// Typed payload returned by the analysis collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub suggested_fix: Option<SuggestedFix>,
    #[serde(default)]
    pub prevention: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
}

impl AnalysisReport {
    /// Parse and validate a raw collaborator payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let report: AnalysisReport = serde_json::from_value(value)?;
        Ok(report.validated())
    }

    /// Clamp the confidence and drop a suggested fix with no content.
    pub fn validated(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if self.suggested_fix.as_ref().is_some_and(SuggestedFix::is_empty) {
            self.suggested_fix = None;
        }
        self
    }
}

/// What the repository-mutation collaborator reports after a successful apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppliedChange {
    pub branch_name: String,
    pub pull_request_url: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

pub(crate) fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collaborator_payload_is_clamped_and_emptied_fix_dropped() {
        let report = AnalysisReport::from_value(json!({
            "error_type": "dependency_error",
            "confidence": 1.7,
            "suggested_fix": { "description": "   ", "steps": [] }
        }))
        .unwrap();

        assert_eq!(report.error_type.as_deref(), Some("dependency_error"));
        assert_eq!(report.confidence, 1.0);
        assert!(report.suggested_fix.is_none());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = AnalysisReport::from_value(json!({ "confidence": "very high" }));
        assert!(err.is_err());

        let err = AnalysisReport::from_value(json!(["not", "an", "object"]));
        assert!(err.is_err());
    }

    #[test]
    fn non_finite_and_negative_confidence_become_zero() {
        let nan = AnalysisReport { confidence: f64::NAN, ..Default::default() }.validated();
        assert_eq!(nan.confidence, 0.0);

        let negative = AnalysisReport { confidence: -0.5, ..Default::default() }.validated();
        assert_eq!(negative.confidence, 0.0);
    }

    #[test]
    fn only_rejected_and_applied_are_terminal() {
        assert!(FixStatus::Rejected.is_terminal());
        assert!(FixStatus::Applied.is_terminal());
        assert!(!FixStatus::ApplicationFailed.is_terminal());
        assert!(!FixStatus::Pending.is_terminal());
    }
}
