//! Error types for the merge engine.

use paperrank_core::error::PaperrankError;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Canonical entity not found: {0}")]
    MissingCanonical(i64),
    #[error("Duplicate group '{0}' has no members")]
    EmptyGroup(String),
    #[error("Storage error: {0}")]
    Storage(#[from] PaperrankError),
}

impl From<MergeError> for PaperrankError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Storage(e) => e,
            other => PaperrankError::Merge(other.to_string()),
        }
    }
}
