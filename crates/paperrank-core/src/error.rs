use thiserror::Error;

/// Top-level error type for the paperrank system.
///
/// Each variant wraps a subsystem failure. Subsystem crates that carry their
/// own error vocabulary implement `From<SubsystemError> for PaperrankError`
/// so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PaperrankError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid embedding for paper {id}: {reason}")]
    InvalidEmbedding { id: i64, reason: String },

    #[error("Ranking error: {0}")]
    Ranking(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Stage '{stage}' failed: {detail}")]
    Stage { stage: String, detail: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Consecutive failure limit reached ({0})")]
    CircuitOpen(u32),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

/// Failure classes used to decide how far an error propagates.
///
/// Per-item classes (`DataQuality`) are skipped and logged; stage-level
/// classes roll up into the iteration tally; only `Fatal` ends the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientNetwork,
    DataQuality,
    ResourceExhaustion,
    Timeout,
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::DataQuality => "data_quality",
            ErrorClass::ResourceExhaustion => "resource_exhaustion",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaperrankError {
    /// Classify this error for propagation decisions and log fields.
    pub fn class(&self) -> ErrorClass {
        match self {
            PaperrankError::Network(_) | PaperrankError::Sink(_) => ErrorClass::TransientNetwork,
            PaperrankError::InvalidEmbedding { .. } | PaperrankError::Serialization(_) => {
                ErrorClass::DataQuality
            }
            PaperrankError::Timeout(_) | PaperrankError::Cancelled => ErrorClass::Timeout,
            PaperrankError::CircuitOpen(_) | PaperrankError::Config(_) => ErrorClass::Fatal,
            PaperrankError::Io(_)
            | PaperrankError::Storage(_)
            | PaperrankError::Ranking(_)
            | PaperrankError::Merge(_)
            | PaperrankError::Pipeline(_)
            | PaperrankError::Stage { .. }
            | PaperrankError::ShuttingDown => ErrorClass::ResourceExhaustion,
        }
    }
}

impl From<toml::de::Error> for PaperrankError {
    fn from(err: toml::de::Error) -> Self {
        PaperrankError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PaperrankError {
    fn from(err: toml::ser::Error) -> Self {
        PaperrankError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PaperrankError {
    fn from(err: serde_json::Error) -> Self {
        PaperrankError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for paperrank operations.
pub type Result<T> = std::result::Result<T, PaperrankError>;
