// cicd-fixer-rs/src/repository.rs
// Persistence layer for failure records and fix suggestions.
//
// Implementation notes:
// - `FileBackedRepository` is an append-only NDJSON log: every insert or
//   update appends a full snapshot of the record, and reads fold the log so
//   the latest snapshot per id wins. Nothing is ever deleted.
// - `InMemoryRepository` keeps the same semantics behind a tokio RwLock and
//   backs tests and ephemeral deployments.
// - Derived queries (approved corpus, per-repository counts) are default
//   trait methods over `list_suggestions`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::model::{FailureRecord, FeedbackOutcome, FixSuggestion, HistoricalFix};

/// Repository error type.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Approved/decided counts for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionCounts {
    pub approved: usize,
    pub decided: usize,
}

impl DecisionCounts {
    pub fn has_history(&self) -> bool {
        self.decided > 0
    }

    pub fn approval_rate(&self) -> Option<f64> {
        (self.decided > 0).then(|| self.approved as f64 / self.decided as f64)
    }
}

#[async_trait]
pub trait FixRepository {
    async fn insert_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError>;

    async fn update_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError>;

    async fn get_failure(&self, id: &str) -> Result<Option<FailureRecord>, RepositoryError>;

    async fn list_failures(&self) -> Result<Vec<FailureRecord>, RepositoryError>;

    async fn upsert_suggestion(&self, suggestion: &FixSuggestion) -> Result<(), RepositoryError>;

    async fn get_suggestion(&self, id: &str) -> Result<Option<FixSuggestion>, RepositoryError>;

    /// All suggestions in insertion order.
    async fn list_suggestions(&self) -> Result<Vec<FixSuggestion>, RepositoryError>;

    /// Failures created at or after `cutoff`, newest first.
    async fn failures_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FailureRecord>, RepositoryError> {
        let mut out: Vec<FailureRecord> = self
            .list_failures()
            .await?
            .into_iter()
            .filter(|f| f.created_at >= cutoff)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Most recent approved fixes with a non-empty error log, newest first.
    async fn recent_approved_fixes(
        &self,
        limit: usize,
    ) -> Result<Vec<HistoricalFix>, RepositoryError> {
        let mut approved: Vec<FixSuggestion> = self
            .list_suggestions()
            .await?
            .into_iter()
            .filter(|s| s.status.is_approved_decision() && !s.error_text.trim().is_empty())
            .collect();
        approved.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(approved.iter().take(limit).map(HistoricalFix::from).collect())
    }

    /// Approved vs decided suggestion counts for an `owner/name` context.
    async fn decision_counts(&self, repository: &str) -> Result<DecisionCounts, RepositoryError> {
        let mut counts = DecisionCounts::default();
        for s in self.list_suggestions().await? {
            if s.repository() != repository {
                continue;
            }
            match s.status.decision() {
                Some(FeedbackOutcome::Approved) => {
                    counts.approved += 1;
                    counts.decided += 1;
                }
                Some(_) => counts.decided += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[derive(Default)]
struct Tables {
    failures: HashMap<String, FailureRecord>,
    failure_order: Vec<String>,
    suggestions: HashMap<String, FixSuggestion>,
    suggestion_order: Vec<String>,
}

impl Tables {
    fn put_failure(&mut self, record: FailureRecord) {
        if !self.failures.contains_key(&record.id) {
            self.failure_order.push(record.id.clone());
        }
        self.failures.insert(record.id.clone(), record);
    }

    fn put_suggestion(&mut self, suggestion: FixSuggestion) {
        if !self.suggestions.contains_key(&suggestion.id) {
            self.suggestion_order.push(suggestion.id.clone());
        }
        self.suggestions.insert(suggestion.id.clone(), suggestion);
    }

    fn ordered_failures(&self) -> Vec<FailureRecord> {
        self.failure_order
            .iter()
            .filter_map(|id| self.failures.get(id).cloned())
            .collect()
    }

    fn ordered_suggestions(&self) -> Vec<FixSuggestion> {
        self.suggestion_order
            .iter()
            .filter_map(|id| self.suggestions.get(id).cloned())
            .collect()
    }
}

/// Process-local repository.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FixRepository for InMemoryRepository {
    async fn insert_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError> {
        self.tables.write().await.put_failure(record.clone());
        Ok(())
    }

    async fn update_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError> {
        self.tables.write().await.put_failure(record.clone());
        Ok(())
    }

    async fn get_failure(&self, id: &str) -> Result<Option<FailureRecord>, RepositoryError> {
        Ok(self.tables.read().await.failures.get(id).cloned())
    }

    async fn list_failures(&self) -> Result<Vec<FailureRecord>, RepositoryError> {
        Ok(self.tables.read().await.ordered_failures())
    }

    async fn upsert_suggestion(&self, suggestion: &FixSuggestion) -> Result<(), RepositoryError> {
        self.tables.write().await.put_suggestion(suggestion.clone());
        Ok(())
    }

    async fn get_suggestion(&self, id: &str) -> Result<Option<FixSuggestion>, RepositoryError> {
        Ok(self.tables.read().await.suggestions.get(id).cloned())
    }

    async fn list_suggestions(&self) -> Result<Vec<FixSuggestion>, RepositoryError> {
        Ok(self.tables.read().await.ordered_suggestions())
    }
}

/// One line of the NDJSON log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
enum LogEntry {
    Failure(FailureRecord),
    Suggestion(FixSuggestion),
}

/// Append-only NDJSON repository on local disk.
///
/// Suitable for single-node deployments. Appends are serialized through a
/// mutex so concurrent writers never interleave partial lines.
pub struct FileBackedRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackedRepository {
    /// Open (or lazily create) the log at `path`.
    ///
    /// The parent directory is created eagerly so callers fail fast on an
    /// unwritable location.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
        let line = serde_json::to_string(entry)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(())
    }

    async fn load(&self) -> Result<Tables, RepositoryError> {
        let mut tables = Tables::default();
        if !fs::try_exists(&self.path).await? {
            return Ok(tables);
        }

        let buf = fs::read_to_string(&self.path).await?;
        for line in buf.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(LogEntry::Failure(record)) => tables.put_failure(record),
                Ok(LogEntry::Suggestion(suggestion)) => tables.put_suggestion(suggestion),
                Err(err) => {
                    tracing::warn!(error = %err, path = %self.path.display(), "failed to parse log line; skipping");
                }
            }
        }

        Ok(tables)
    }
}

#[async_trait]
impl FixRepository for FileBackedRepository {
    async fn insert_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError> {
        self.append(&LogEntry::Failure(record.clone())).await
    }

    async fn update_failure(&self, record: &FailureRecord) -> Result<(), RepositoryError> {
        self.append(&LogEntry::Failure(record.clone())).await
    }

    async fn get_failure(&self, id: &str) -> Result<Option<FailureRecord>, RepositoryError> {
        Ok(self.load().await?.failures.remove(id))
    }

    async fn list_failures(&self) -> Result<Vec<FailureRecord>, RepositoryError> {
        Ok(self.load().await?.ordered_failures())
    }

    async fn upsert_suggestion(&self, suggestion: &FixSuggestion) -> Result<(), RepositoryError> {
        self.append(&LogEntry::Suggestion(suggestion.clone())).await
    }

    async fn get_suggestion(&self, id: &str) -> Result<Option<FixSuggestion>, RepositoryError> {
        Ok(self.load().await?.suggestions.remove(id))
    }

    async fn list_suggestions(&self) -> Result<Vec<FixSuggestion>, RepositoryError> {
        Ok(self.load().await?.ordered_suggestions())
    }
}
