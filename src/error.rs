use thiserror::Error;

/// Errors produced by the analytics engine.
///
/// `MalformedRecord` is handled at the normalization boundary (skip and log);
/// the other variants abort the whole query and reach the caller typed, never
/// as a partially-populated aggregate.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("malformed activity record: {reason}")]
    MalformedRecord { reason: String },

    #[error("subject not found: {subject}")]
    NotFound { subject: String },

    #[error("invalid time range {value:?}, expected one of 7days, 30days, 90days, 1year")]
    InvalidRange { value: String },

    #[error("event store did not respond within {timeout_secs}s")]
    UpstreamTimeout { timeout_secs: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        EngineError::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same query unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::UpstreamTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
