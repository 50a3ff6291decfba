// cicd-fixer-rs/src/pattern_store.rs
// Learned fix patterns keyed by error signature, updated from human feedback.
//
// Every mutation runs read-modify-write and the replace-all persist inside
// one async mutex, so concurrent feedback for the same signature cannot lose
// updates and the snapshot on disk always matches memory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::model::FeedbackOutcome;
use crate::repository::RepositoryError;

/// A generalized fix associated with a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub error_signature: String,
    pub fix_template: String,
    /// Online mean of outcomes (1 approved, 0 rejected).
    pub success_rate: f64,
    pub usage_count: u64,
    pub repo_contexts: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

impl LearnedPattern {
    fn new(signature: &str, fix_template: &str, repo_context: &str) -> Self {
        Self {
            error_signature: signature.to_string(),
            fix_template: fix_template.to_string(),
            success_rate: 1.0,
            usage_count: 1,
            repo_contexts: BTreeSet::from([repo_context.to_string()]),
            last_updated: Utc::now(),
        }
    }

    /// Fold one more outcome into the running mean. The template is kept.
    fn observe(&mut self, outcome: f64, repo_context: &str) {
        self.usage_count += 1;
        let n = self.usage_count as f64;
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
        self.repo_contexts.insert(repo_context.to_string());
        self.last_updated = Utc::now();
    }
}

/// What an `upsert` did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(LearnedPattern),
    Updated(LearnedPattern),
    /// Pending feedback, or a rejection of a never-seen signature.
    Ignored,
}

/// Durable storage for the full pattern set.
#[async_trait]
pub trait PatternPersistence {
    async fn load(&self) -> Result<Vec<LearnedPattern>, RepositoryError>;

    /// Replace everything stored with `patterns`.
    async fn persist_all(&self, patterns: &[LearnedPattern]) -> Result<(), RepositoryError>;
}

/// JSON snapshot file, replaced atomically via write-to-temp and rename.
pub struct FilePatternPersistence {
    path: PathBuf,
}

impl FilePatternPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Serialize, Deserialize)]
struct PatternSnapshot {
    updated_at: DateTime<Utc>,
    patterns: Vec<LearnedPattern>,
}

#[async_trait]
impl PatternPersistence for FilePatternPersistence {
    async fn load(&self) -> Result<Vec<LearnedPattern>, RepositoryError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).await?;
        let snapshot: PatternSnapshot = serde_json::from_str(&raw)?;
        Ok(snapshot.patterns)
    }

    async fn persist_all(&self, patterns: &[LearnedPattern]) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let snapshot = PatternSnapshot {
            updated_at: Utc::now(),
            patterns: patterns.to_vec(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory pattern set with write-through persistence.
///
/// Constructed once per process via [`PatternStore::open`] and shared by
/// reference; [`PatternStore::close`] flushes the final state.
pub struct PatternStore {
    patterns: Mutex<Vec<LearnedPattern>>,
    persistence: Box<dyn PatternPersistence + Send + Sync>,
}

impl PatternStore {
    /// Load the persisted pattern set.
    pub async fn open(
        persistence: Box<dyn PatternPersistence + Send + Sync>,
    ) -> Result<Self, RepositoryError> {
        let patterns = persistence.load().await?;
        tracing::info!(count = patterns.len(), "loaded learned patterns");
        Ok(Self {
            patterns: Mutex::new(patterns),
            persistence,
        })
    }

    /// Apply one feedback event to the pattern for `signature`.
    #[instrument(name = "pattern_upsert", skip(self, fix_template, outcome), fields(outcome = outcome.as_str()))]
    pub async fn upsert(
        &self,
        signature: &str,
        outcome: FeedbackOutcome,
        fix_template: &str,
        repo_context: &str,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let value = match outcome {
            FeedbackOutcome::Approved => 1.0,
            FeedbackOutcome::Rejected => 0.0,
            FeedbackOutcome::Pending => return Ok(UpsertOutcome::Ignored),
        };

        let mut patterns = self.patterns.lock().await;
        // Staged on a copy; memory only changes once the snapshot is on disk.
        let mut staged = patterns.clone();
        let result = match staged.iter_mut().find(|p| p.error_signature == signature) {
            Some(pattern) => {
                pattern.observe(value, repo_context);
                UpsertOutcome::Updated(pattern.clone())
            }
            None if outcome == FeedbackOutcome::Approved => {
                let pattern = LearnedPattern::new(signature, fix_template, repo_context);
                staged.push(pattern.clone());
                UpsertOutcome::Created(pattern)
            }
            None => return Ok(UpsertOutcome::Ignored),
        };

        self.persistence.persist_all(&staged).await?;
        *patterns = staged;
        metrics::increment_counter!("cicd_fixer_feedback_total", "outcome" => outcome.as_str());
        Ok(result)
    }

    pub async fn get(&self, signature: &str) -> Option<LearnedPattern> {
        self.patterns
            .lock()
            .await
            .iter()
            .find(|p| p.error_signature == signature)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<LearnedPattern> {
        self.patterns.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.patterns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.patterns.lock().await.is_empty()
    }

    /// Persist the current set one last time.
    pub async fn close(&self) -> Result<(), RepositoryError> {
        let patterns = self.patterns.lock().await;
        self.persistence.persist_all(&patterns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> FilePatternPersistence {
        FilePatternPersistence::new(dir.join("patterns.json"))
    }

    /// Persistence that refuses writes while `down` is set.
    struct FlakyDisk {
        down: std::sync::atomic::AtomicBool,
        saved: Mutex<Vec<LearnedPattern>>,
    }

    #[async_trait]
    impl PatternPersistence for std::sync::Arc<FlakyDisk> {
        async fn load(&self) -> Result<Vec<LearnedPattern>, RepositoryError> {
            Ok(self.saved.lock().await.clone())
        }

        async fn persist_all(&self, patterns: &[LearnedPattern]) -> Result<(), RepositoryError> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("disk full".to_string()));
            }
            *self.saved.lock().await = patterns.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_persist_leaves_memory_untouched() {
        let disk = std::sync::Arc::new(FlakyDisk {
            down: std::sync::atomic::AtomicBool::new(true),
            saved: Mutex::new(Vec::new()),
        });
        let store = PatternStore::open(Box::new(disk.clone())).await.expect("open");

        let err = store
            .upsert("sig", FeedbackOutcome::Approved, "npm ci", "acme/a")
            .await
            .expect_err("persist fails");
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        assert!(store.get("sig").await.is_none());

        disk.down.store(false, std::sync::atomic::Ordering::SeqCst);
        store
            .upsert("sig", FeedbackOutcome::Approved, "npm ci", "acme/a")
            .await
            .expect("retry persists");

        let pattern = store.get("sig").await.expect("pattern");
        assert_eq!(pattern.usage_count, 1);
        assert_eq!(disk.saved.lock().await.len(), 1);

        disk.down.store(true, std::sync::atomic::Ordering::SeqCst);
        store
            .upsert("sig", FeedbackOutcome::Rejected, "npm ci", "acme/a")
            .await
            .expect_err("persist fails again");
        let unchanged = store.get("sig").await.expect("pattern");
        assert_eq!(unchanged.usage_count, 1);
        assert_eq!(unchanged.success_rate, 1.0);
    }

    #[tokio::test]
    async fn approvals_keep_rate_at_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PatternStore::open(Box::new(store_in(dir.path())))
            .await
            .expect("open");

        for _ in 0..4 {
            store
                .upsert("abc123", FeedbackOutcome::Approved, "fix it", "acme/widgets")
                .await
                .expect("upsert");
        }

        let pattern = store.get("abc123").await.expect("pattern exists");
        assert_eq!(pattern.usage_count, 4);
        assert!((pattern.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn approval_then_rejection_halves_rate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PatternStore::open(Box::new(store_in(dir.path())))
            .await
            .expect("open");

        store
            .upsert("sig", FeedbackOutcome::Approved, "first template", "acme/a")
            .await
            .expect("approve");
        let outcome = store
            .upsert("sig", FeedbackOutcome::Rejected, "second template", "acme/b")
            .await
            .expect("reject");

        let UpsertOutcome::Updated(pattern) = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(pattern.usage_count, 2);
        assert!((pattern.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(pattern.fix_template, "first template");
        assert_eq!(pattern.repo_contexts.len(), 2);
    }

    #[tokio::test]
    async fn rejection_of_unknown_signature_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let persistence = store_in(dir.path());
        let path = persistence.path().to_path_buf();
        let store = PatternStore::open(Box::new(persistence)).await.expect("open");

        let outcome = store
            .upsert("never-seen", FeedbackOutcome::Rejected, "x", "acme/a")
            .await
            .expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Ignored);

        let pending = store
            .upsert("never-seen", FeedbackOutcome::Pending, "x", "acme/a")
            .await
            .expect("upsert");
        assert_eq!(pending, UpsertOutcome::Ignored);

        assert!(store.is_empty().await);
        assert!(!path.exists(), "nothing to persist");
    }

    #[tokio::test]
    async fn patterns_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = PatternStore::open(Box::new(store_in(dir.path())))
                .await
                .expect("open");
            store
                .upsert("sig-a", FeedbackOutcome::Approved, "npm ci", "acme/a")
                .await
                .expect("upsert");
            store.close().await.expect("close");
        }

        let reopened = PatternStore::open(Box::new(store_in(dir.path())))
            .await
            .expect("reopen");
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.get("sig-a").await.map(|p| p.fix_template),
            Some("npm ci".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_feedback_is_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = std::sync::Arc::new(
            PatternStore::open(Box::new(store_in(dir.path())))
                .await
                .expect("open"),
        );
        store
            .upsert("hot", FeedbackOutcome::Approved, "t", "acme/a")
            .await
            .expect("seed");

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let outcome = if i % 2 == 0 {
                    FeedbackOutcome::Approved
                } else {
                    FeedbackOutcome::Rejected
                };
                store.upsert("hot", outcome, "t", "acme/a").await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("upsert");
        }

        let pattern = store.get("hot").await.expect("pattern");
        assert_eq!(pattern.usage_count, 17);
        // 9 approvals out of 17 observations, independent of interleaving.
        assert!((pattern.success_rate - 9.0 / 17.0).abs() < 1e-9);
    }
}
