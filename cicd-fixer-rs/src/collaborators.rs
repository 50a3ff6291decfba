// cicd-fixer-rs/src/collaborators.rs
// Seams for the network-bound collaborators: AI analysis and repository
// mutation. Both are called under a timeout by the engine; implementations
// live outside this crate.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AnalysisReport, AppliedChange, FailureRecord};

/// Error type for external collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator call failed: {0}")]
    Failed(String),

    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid collaborator payload: {0}")]
    InvalidPayload(String),
}

/// Produces a structured fix suggestion for a failure.
#[async_trait]
pub trait FailureAnalyzer {
    async fn analyze(&self, failure: &FailureRecord) -> Result<AnalysisReport, CollaboratorError>;
}

/// Decode a raw analysis payload, e.g. the JSON an AI backend returned.
///
/// Analyzer implementations call this at their boundary so a malformed
/// payload surfaces as `InvalidPayload` instead of a half-filled report.
pub fn decode_report(payload: Value) -> Result<AnalysisReport, CollaboratorError> {
    AnalysisReport::from_value(payload)
        .map_err(|err| CollaboratorError::InvalidPayload(err.to_string()))
}

/// What the mutation collaborator needs to open a branch / pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixApplication {
    pub fix_id: String,
    pub owner: String,
    pub repo: String,
    pub workflow_name: String,
    pub fix_content: String,
}

/// Applies an approved fix to the target repository.
#[async_trait]
pub trait RepositoryMutator {
    async fn apply_fix(&self, request: &FixApplication) -> Result<AppliedChange, CollaboratorError>;
}

/// Await a collaborator call, mapping an elapsed deadline onto
/// `CollaboratorError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(limit)),
    }
}
