 // cicd-fixer-rs/src/lib.rs
 // Library interface for the CI/CD fixer engine.
 //
 // The engine ingests failed workflow runs, asks an analysis collaborator
 // for a fix, keeps suggestions under human control through an explicit
 // lifecycle, and learns from approvals and rejections to rank historical
 // fixes and predict success of new ones.
 //
 // Design notes:
 // - Pure library crate; HTTP surfaces and the AI / VCS clients live with
 //   the embedding service and plug in through `collaborators`.
 // - All state is owned by one `CicdFixer` value; there are no globals.

use std::{env, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use tracing::instrument;

pub mod model;

pub mod analysis;
pub mod analytics;
pub mod classifier;
pub mod collaborators;
pub mod lifecycle;
pub mod pattern_store;
pub mod predictor;
pub mod recommend;
pub mod repository;
pub mod signature;
pub mod similarity;
pub mod supervisor;
pub mod telemetry;


use crate::analysis::{AnalysisOutcome, AnalysisPipeline};
use crate::analytics::{
    FailurePatternReport, FixEffectivenessReport, PatternAnalyzer, PatternInsights,
    RepositoryProfile, pattern_insights,
};
use crate::classifier::{ErrorClassifier, RegexErrorClassifier};
use crate::collaborators::{CollaboratorError, FailureAnalyzer, RepositoryMutator};
use crate::lifecycle::FixLifecycle;
use crate::model::{FailureEvent, FeedbackOutcome, FixAction, FixStatus, FixSuggestion};
use crate::pattern_store::{FilePatternPersistence, LearnedPattern, PatternStore, UpsertOutcome};
use crate::predictor::{PredictionResult, SuccessPredictor};
use crate::recommend::{EnhancedFix, FixRecommender};
use crate::repository::{FileBackedRepository, FixRepository, RepositoryError};
use crate::similarity::{DEFAULT_CORPUS_LIMIT, DEFAULT_MIN_SIMILARITY, SimilarFix, SimilarityMatcher};
use crate::supervisor::TaskSupervisor;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, FixerError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum FixerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot {action} {id}: suggestion is {status}")]
    InvalidState {
        id: String,
        status: FixStatus,
        action: String,
    },

    #[error("external collaborator error: {0}")]
    ExternalCollaborator(#[from] CollaboratorError),

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),
}

impl FixerError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        FixerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Errors caused by the request rather than by the engine or its
    /// collaborators.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            FixerError::NotFound { .. } | FixerError::InvalidState { .. }
        )
    }
}

/// Runtime configuration for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FixerConfig {
    /// Directory holding the record log and the learned-pattern snapshot.
    pub data_dir: PathBuf,
    pub min_similarity: f64,
    pub corpus_limit: usize,
    pub analysis_timeout: Duration,
    pub apply_timeout: Duration,
    /// Launch the application task as soon as a fix is approved.
    pub auto_apply: bool,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/cicd-fixer"),
            min_similarity: DEFAULT_MIN_SIMILARITY,
            corpus_limit: DEFAULT_CORPUS_LIMIT,
            analysis_timeout: Duration::from_secs(60),
            apply_timeout: Duration::from_secs(120),
            auto_apply: true,
        }
    }
}

impl FixerConfig {
    /// Construct configuration from environment variables.
    ///
    /// Never panics; unset variables keep their defaults and unparsable
    /// ones are reported and ignored.
    pub fn from_env() -> Self {
        fn parse_var<T: FromStr>(name: &str, default: T) -> T {
            match env::var(name) {
                Ok(raw) => match raw.trim().parse() {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::warn!(var = name, value = %raw, "ignoring unparsable setting");
                        default
                    }
                },
                Err(_) => default,
            }
        }

        fn parse_bool_var(name: &str, default: bool) -> bool {
            match env::var(name) {
                Ok(val) => {
                    let v = val.trim().to_ascii_lowercase();
                    match v.as_str() {
                        "1" | "true" | "yes" | "on" => true,
                        "0" | "false" | "no" | "off" => false,
                        _ => {
                            tracing::warn!(var = name, value = %val, "ignoring unparsable flag");
                            default
                        }
                    }
                }
                Err(_) => default,
            }
        }

        let defaults = Self::default();
        let min_similarity = parse_var("CICD_FIXER_MIN_SIMILARITY", defaults.min_similarity);

        Self {
            data_dir: env::var("CICD_FIXER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            min_similarity: if (0.0..=1.0).contains(&min_similarity) {
                min_similarity
            } else {
                tracing::warn!(min_similarity, "similarity threshold out of range; using default");
                defaults.min_similarity
            },
            corpus_limit: parse_var("CICD_FIXER_CORPUS_LIMIT", defaults.corpus_limit),
            analysis_timeout: Duration::from_secs(parse_var(
                "CICD_FIXER_ANALYSIS_TIMEOUT_SECS",
                defaults.analysis_timeout.as_secs(),
            )),
            apply_timeout: Duration::from_secs(parse_var(
                "CICD_FIXER_APPLY_TIMEOUT_SECS",
                defaults.apply_timeout.as_secs(),
            )),
            auto_apply: parse_bool_var("CICD_FIXER_AUTO_APPLY", defaults.auto_apply),
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.ndjson")
    }

    pub fn patterns_path(&self) -> PathBuf {
        self.data_dir.join("learned_patterns.json")
    }
}

/// Core engine.
///
/// Typical usage (inside an async context):
///
/// ```ignore
/// let fixer = CicdFixer::open(FixerConfig::from_env(), analyzer, mutator).await?;
///
/// let outcome = fixer.analyze_failure(&event).await?;
/// if let Some(suggestion) = outcome.suggestion() {
///     fixer.transition(&suggestion.id, FixAction::Approve).await?;
/// }
/// fixer.shutdown().await;
/// ```
pub struct CicdFixer {
    cfg: FixerConfig,
    repo: Arc<dyn FixRepository + Send + Sync>,
    patterns: Arc<PatternStore>,
    supervisor: Arc<TaskSupervisor>,
    pipeline: AnalysisPipeline,
    matcher: SimilarityMatcher,
    predictor: SuccessPredictor,
    lifecycle: FixLifecycle,
    recommender: FixRecommender,
    analyzer: PatternAnalyzer,
}

impl CicdFixer {
    /// Construct an engine backed by the on-disk stores under
    /// `cfg.data_dir`.
    pub async fn open(
        cfg: FixerConfig,
        analyzer: Arc<dyn FailureAnalyzer + Send + Sync>,
        mutator: Arc<dyn RepositoryMutator + Send + Sync>,
    ) -> Result<Self> {
        let repo: Arc<dyn FixRepository + Send + Sync> =
            Arc::new(FileBackedRepository::new(cfg.records_path())?);
        let patterns = Arc::new(
            PatternStore::open(Box::new(FilePatternPersistence::new(cfg.patterns_path()))).await?,
        );
        tracing::info!(data_dir = %cfg.data_dir.display(), "cicd fixer opened");

        Ok(Self::with_components(cfg, repo, patterns, analyzer, mutator))
    }

    /// Construct an engine over explicit stores.
    pub fn with_components(
        cfg: FixerConfig,
        repo: Arc<dyn FixRepository + Send + Sync>,
        patterns: Arc<PatternStore>,
        analyzer: Arc<dyn FailureAnalyzer + Send + Sync>,
        mutator: Arc<dyn RepositoryMutator + Send + Sync>,
    ) -> Self {
        let classifier: Arc<dyn ErrorClassifier + Send + Sync> = Arc::new(RegexErrorClassifier);
        let supervisor = Arc::new(TaskSupervisor::new());

        let pipeline = AnalysisPipeline::new(
            repo.clone(),
            analyzer,
            classifier.clone(),
            cfg.analysis_timeout,
        );
        let matcher = SimilarityMatcher::new(repo.clone(), cfg.corpus_limit);
        let predictor =
            SuccessPredictor::new(matcher.clone(), repo.clone()).with_classifier(classifier.clone());
        let lifecycle = FixLifecycle::new(
            repo.clone(),
            patterns.clone(),
            mutator,
            supervisor.clone(),
            cfg.apply_timeout,
        )
        .with_auto_apply(cfg.auto_apply);
        let recommender = FixRecommender::new(
            matcher.clone(),
            SuccessPredictor::new(matcher.clone(), repo.clone()).with_classifier(classifier.clone()),
            cfg.min_similarity,
        );
        let analyzer = PatternAnalyzer::new(repo.clone(), classifier);

        Self {
            cfg,
            repo,
            patterns,
            supervisor,
            pipeline,
            matcher,
            predictor,
            lifecycle,
            recommender,
            analyzer,
        }
    }

    pub fn config(&self) -> &FixerConfig {
        &self.cfg
    }

    pub fn repository(&self) -> Arc<dyn FixRepository + Send + Sync> {
        self.repo.clone()
    }

    /// Persist a failed run and ask the analysis collaborator for a fix.
    pub async fn analyze_failure(&self, event: &FailureEvent) -> Result<AnalysisOutcome> {
        Ok(self.pipeline.run(event).await?)
    }

    /// Analyze a failed run in a supervised background task.
    pub async fn spawn_analysis(&self, event: FailureEvent) {
        let pipeline = self.pipeline.clone();
        self.supervisor
            .spawn("analyze_failure", async move {
                if let Err(err) = pipeline.run(&event).await {
                    tracing::error!(
                        owner = %event.owner,
                        repo = %event.repo,
                        run_id = event.run_id,
                        error = %err,
                        "background analysis failed"
                    );
                }
            })
            .await;
    }

    /// Learn from a human decision on a fix for `error_text`.
    #[instrument(name = "record_feedback", skip(self, error_text, fix_text))]
    pub async fn record_feedback(
        &self,
        error_text: &str,
        outcome: FeedbackOutcome,
        fix_text: &str,
        repo_context: &str,
    ) -> Result<UpsertOutcome> {
        let signature = signature::extract_signature(error_text);
        Ok(self
            .patterns
            .upsert(&signature, outcome, fix_text, repo_context)
            .await?)
    }

    /// Ranked approved fixes similar to `error_text`; empty when the store
    /// cannot be read.
    pub async fn find_similar(
        &self,
        error_text: &str,
        repo_context: &str,
        min_similarity: Option<f64>,
    ) -> Vec<SimilarFix> {
        self.matcher
            .find_similar(
                error_text,
                repo_context,
                min_similarity.unwrap_or(self.cfg.min_similarity),
            )
            .await
    }

    pub async fn predict_success(
        &self,
        error_text: &str,
        fix_text: &str,
        repo_context: &str,
    ) -> PredictionResult {
        self.predictor
            .predict(error_text, fix_text, repo_context)
            .await
    }

    pub async fn get_suggestion(&self, id: &str) -> Result<FixSuggestion> {
        self.repo
            .get_suggestion(id)
            .await?
            .ok_or_else(|| FixerError::not_found("suggestion", id))
    }

    pub async fn transition(&self, id: &str, action: FixAction) -> Result<FixSuggestion> {
        self.lifecycle.transition(id, action).await
    }

    pub async fn approve(&self, id: &str) -> Result<FixSuggestion> {
        self.lifecycle.approve(id).await
    }

    pub async fn reject(&self, id: &str) -> Result<FixSuggestion> {
        self.lifecycle.reject(id).await
    }

    pub async fn apply(&self, id: &str) -> Result<FixSuggestion> {
        self.lifecycle.apply(id).await
    }

    pub async fn enhance_fix(
        &self,
        error_text: &str,
        repo_context: &str,
        base_fix: Option<&str>,
    ) -> EnhancedFix {
        self.recommender
            .recommend(error_text, repo_context, base_fix)
            .await
    }

    pub async fn analyze_failure_patterns(&self, days_back: i64) -> FailurePatternReport {
        self.analyzer.analyze_failure_patterns(days_back).await
    }

    pub async fn fix_effectiveness(&self) -> FixEffectivenessReport {
        self.analyzer.fix_effectiveness().await
    }

    pub async fn repository_profile(&self, owner: &str, repo: &str) -> RepositoryProfile {
        self.analyzer.repository_profile(owner, repo).await
    }

    pub async fn pattern_insights(&self) -> PatternInsights {
        pattern_insights(&self.patterns.snapshot().await, chrono::Utc::now())
    }

    pub async fn learned_patterns(&self) -> Vec<LearnedPattern> {
        self.patterns.snapshot().await
    }

    /// Wait for background work to settle without shutting down.
    pub async fn wait_idle(&self) {
        self.supervisor.drain().await;
    }

    /// Wait for every background task and flush the learned patterns.
    #[instrument(name = "cicd_fixer_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.supervisor.drain().await;
        if let Err(err) = self.patterns.close().await {
            tracing::error!(error = %err, "failed to persist learned patterns on shutdown");
        }
        tracing::info!("cicd fixer shut down");
    }
}
