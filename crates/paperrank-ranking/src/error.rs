//! Error types for ranking and result persistence.

use paperrank_core::error::PaperrankError;

/// Errors from a column sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Table not found: {0}")]
    MissingTable(String),
    #[error("Unknown column family '{family}' in table {table}")]
    UnknownFamily { table: String, family: String },
    #[error("Sink rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Sink write failed: {0}")]
    WriteFailed(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] PaperrankError),
}

/// Errors from the ranking engine and cycle.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("Invalid ranking parameter: {0}")]
    InvalidParameter(String),
    #[error("Ranking cancelled")]
    Cancelled,
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Storage error: {0}")]
    Storage(#[from] PaperrankError),
}

impl From<RankingError> for PaperrankError {
    fn from(err: RankingError) -> Self {
        match err {
            RankingError::Cancelled => PaperrankError::Cancelled,
            RankingError::Storage(e) => e,
            RankingError::Sink(SinkError::Http(e)) => PaperrankError::Network(e.to_string()),
            RankingError::Sink(e) => PaperrankError::Sink(e.to_string()),
            RankingError::InvalidParameter(msg) => PaperrankError::Ranking(msg),
        }
    }
}
