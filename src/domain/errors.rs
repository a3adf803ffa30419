//! Domain errors for the MCMCP engine.

use thiserror::Error;

/// Domain-level errors that can occur while running chains.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Failed to load gatekeeper for category '{category}': {reason}")]
    GatekeeperLoad { category: String, reason: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Gatekeeper decided {attempts} consecutive trials on chain {chain} without presenting one")]
    GatekeeperRejectionLoop { chain: String, attempts: u32 },

    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("Participant {participant} does not hold the turn on chain {chain}")]
    NotYourTurn { participant: String, chain: String },

    #[error("Invalid covariance: {0}")]
    InvalidCovariance(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether the caller may retry the whole get/register step unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_persistence_is_retryable() {
        assert!(DomainError::Persistence("locked".into()).is_retryable());
        assert!(!DomainError::UnknownCategory("cat".into()).is_retryable());
        assert!(!DomainError::DimensionMismatch { expected: 2, actual: 3 }.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = DomainError::NotYourTurn {
            participant: "p1".into(),
            chain: "team-1/cat#1".into(),
        };
        assert_eq!(err.to_string(), "Participant p1 does not hold the turn on chain team-1/cat#1");
    }
}
