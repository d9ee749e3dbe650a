//! Error types for pipeline stages.

use paperrank_core::error::{ErrorClass, PaperrankError};
use paperrank_ranking::{RankingError, SinkError};

/// Why a stage invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage failed: {0}")]
    Failed(String),
    #[error("Failed to spawn command: {0}")]
    Spawn(String),
    #[error("Command exited with status {code:?}: {detail}")]
    ExitStatus { code: Option<i32>, detail: String },
    #[error("Stage cancelled")]
    Cancelled,
    #[error("Invalid stage configuration: {0}")]
    Config(String),
    #[error("Ranking error: {0}")]
    Ranking(#[from] RankingError),
    #[error("Storage error: {0}")]
    Storage(#[from] PaperrankError),
}

impl StageError {
    /// Failure class used in log fields.
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Cancelled | StageError::Ranking(RankingError::Cancelled) => {
                ErrorClass::Timeout
            }
            StageError::Config(_) | StageError::Ranking(RankingError::InvalidParameter(_)) => {
                ErrorClass::Fatal
            }
            StageError::Ranking(RankingError::Sink(SinkError::Http(_))) => {
                ErrorClass::TransientNetwork
            }
            StageError::Ranking(RankingError::Storage(e)) | StageError::Storage(e) => e.class(),
            StageError::Ranking(RankingError::Sink(_)) => ErrorClass::TransientNetwork,
            StageError::Failed(_) | StageError::Spawn(_) | StageError::ExitStatus { .. } => {
                ErrorClass::ResourceExhaustion
            }
        }
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            StageError::Failed("stage panicked".to_string())
        } else {
            StageError::Cancelled
        }
    }
}
