// cicd-fixer-rs/src/lifecycle.rs
// Fix suggestion lifecycle: pending -> approved | rejected, and
// approved | application_failed -> applying -> applied | application_failed.
//
// Every transition is a compare-and-set on the stored suggestion, performed
// under one transition lock, so two racing `approve` calls cannot both win.
// Application is three-phase (mark applying, call the mutator, settle) so an
// interrupted attempt stays visible as `applying`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::collaborators::{FixApplication, RepositoryMutator, with_timeout};
use crate::model::{FeedbackOutcome, FixAction, FixStatus, FixSuggestion};
use crate::pattern_store::PatternStore;
use crate::repository::FixRepository;
use crate::signature::extract_signature;
use crate::supervisor::TaskSupervisor;
use crate::{FixerError, Result};

/// Compare-and-set access to stored suggestions.
#[derive(Clone)]
struct Transitions {
    repo: Arc<dyn FixRepository + Send + Sync>,
    lock: Arc<Mutex<()>>,
}

impl Transitions {
    /// Move `id` to `target` if the lifecycle graph allows it from the
    /// current status, applying `update` to the record before it is stored.
    async fn advance<F>(
        &self,
        id: &str,
        target: FixStatus,
        action: &str,
        update: F,
    ) -> Result<FixSuggestion>
    where
        F: FnOnce(&mut FixSuggestion),
    {
        let _guard = self.lock.lock().await;

        let mut suggestion = self
            .repo
            .get_suggestion(id)
            .await?
            .ok_or_else(|| FixerError::not_found("suggestion", id))?;

        if !suggestion.status.can_transition_to(target) {
            return Err(FixerError::InvalidState {
                id: id.to_string(),
                status: suggestion.status,
                action: action.to_string(),
            });
        }

        let from = suggestion.status;
        suggestion.status = target;
        suggestion.updated_at = Utc::now();
        update(&mut suggestion);
        self.repo.upsert_suggestion(&suggestion).await?;

        tracing::info!(suggestion.id = %id, %from, to = %target, "fix status changed");
        metrics::increment_counter!(
            "cicd_fixer_transitions_total",
            "to" => target.as_str()
        );
        Ok(suggestion)
    }
}

/// Runs one application attempt end to end.
#[derive(Clone)]
struct Applier {
    transitions: Transitions,
    mutator: Arc<dyn RepositoryMutator + Send + Sync>,
    timeout: Duration,
}

impl Applier {
    async fn apply(&self, id: &str) -> Result<FixSuggestion> {
        let applying = self
            .transitions
            .advance(id, FixStatus::Applying, FixAction::Apply.as_str(), |s| {
                s.application_attempts += 1;
                s.error_message = None;
            })
            .await?;

        let request = FixApplication {
            fix_id: applying.id.clone(),
            owner: applying.owner.clone(),
            repo: applying.repo.clone(),
            workflow_name: applying.workflow_name.clone(),
            fix_content: applying.fix_text.clone(),
        };
        tracing::info!(
            suggestion.id = %id,
            repository = %applying.repository(),
            attempt = applying.application_attempts,
            "applying fix"
        );

        match with_timeout(self.timeout, self.mutator.apply_fix(&request)).await {
            Ok(change) => {
                metrics::increment_counter!("cicd_fixer_applications_total", "outcome" => "applied");
                self.transitions
                    .advance(id, FixStatus::Applied, "settle", |s| {
                        s.branch_name = Some(change.branch_name);
                        s.pull_request_url = change.pull_request_url;
                        s.files_changed = change.files_changed;
                    })
                    .await
            }
            Err(err) => {
                tracing::error!(suggestion.id = %id, error = %err, "fix application failed");
                metrics::increment_counter!("cicd_fixer_applications_total", "outcome" => "failed");
                self.transitions
                    .advance(id, FixStatus::ApplicationFailed, "settle", |s| {
                        s.error_message = Some(err.to_string());
                    })
                    .await
            }
        }
    }
}

/// State machine governing fix suggestions.
pub struct FixLifecycle {
    transitions: Transitions,
    applier: Applier,
    patterns: Arc<PatternStore>,
    supervisor: Arc<TaskSupervisor>,
    auto_apply: bool,
}

impl FixLifecycle {
    pub fn new(
        repo: Arc<dyn FixRepository + Send + Sync>,
        patterns: Arc<PatternStore>,
        mutator: Arc<dyn RepositoryMutator + Send + Sync>,
        supervisor: Arc<TaskSupervisor>,
        apply_timeout: Duration,
    ) -> Self {
        let transitions = Transitions {
            repo,
            lock: Arc::new(Mutex::new(())),
        };
        let applier = Applier {
            transitions: transitions.clone(),
            mutator,
            timeout: apply_timeout,
        };
        Self {
            transitions,
            applier,
            patterns,
            supervisor,
            auto_apply: true,
        }
    }

    /// Whether `approve` launches the application task.
    pub fn with_auto_apply(mut self, enabled: bool) -> Self {
        self.auto_apply = enabled;
        self
    }

    pub async fn transition(&self, id: &str, action: FixAction) -> Result<FixSuggestion> {
        match action {
            FixAction::Approve => self.approve(id).await,
            FixAction::Reject => self.reject(id).await,
            FixAction::Apply => self.apply(id).await,
        }
    }

    /// Approve a pending suggestion and start applying it in the background.
    ///
    /// Returns the suggestion in `approved`; the terminal application outcome
    /// is persisted by the supervised task.
    #[instrument(name = "approve_fix", skip(self))]
    pub async fn approve(&self, id: &str) -> Result<FixSuggestion> {
        let approved = self
            .transitions
            .advance(id, FixStatus::Approved, FixAction::Approve.as_str(), |_| {})
            .await?;

        self.forward_feedback(&approved, FeedbackOutcome::Approved).await;

        if self.auto_apply {
            let applier = self.applier.clone();
            let fix_id = approved.id.clone();
            self.supervisor
                .spawn("apply_fix", async move {
                    if let Err(err) = applier.apply(&fix_id).await {
                        tracing::error!(suggestion.id = %fix_id, error = %err, "background application did not settle");
                    }
                })
                .await;
        }

        Ok(approved)
    }

    #[instrument(name = "reject_fix", skip(self))]
    pub async fn reject(&self, id: &str) -> Result<FixSuggestion> {
        let rejected = self
            .transitions
            .advance(id, FixStatus::Rejected, FixAction::Reject.as_str(), |_| {})
            .await?;

        self.forward_feedback(&rejected, FeedbackOutcome::Rejected).await;
        Ok(rejected)
    }

    /// Apply an approved (or previously failed) suggestion and wait for the
    /// outcome. A collaborator failure settles as `application_failed`
    /// rather than an error.
    #[instrument(name = "apply_fix", skip(self))]
    pub async fn apply(&self, id: &str) -> Result<FixSuggestion> {
        self.applier.apply(id).await
    }

    /// Feed a human decision into the pattern store. Learning failures are
    /// logged; the decision itself is already persisted.
    async fn forward_feedback(&self, suggestion: &FixSuggestion, outcome: FeedbackOutcome) {
        let signature = extract_signature(&suggestion.error_text);
        if let Err(err) = self
            .patterns
            .upsert(
                &signature,
                outcome,
                &suggestion.fix_text,
                &suggestion.repository(),
            )
            .await
        {
            tracing::error!(suggestion.id = %suggestion.id, error = %err, "failed to record feedback");
        }
    }
}
