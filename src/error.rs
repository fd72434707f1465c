//! Error types for stratum

use thiserror::Error;

/// Result type alias for stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;

/// Main error type for stratum
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Retrieval deadline exceeded")]
    DeadlineExceeded,

    #[error("Record store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StratumError {
    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StratumError::CapacityExhausted(_) | StratumError::Collaborator(_)
        )
    }

    /// Check if the error is fatal for the caller; everything else is
    /// degraded success
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StratumError::InvalidInput(_) | StratumError::DeadlineExceeded
        )
    }
}
