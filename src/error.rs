//! # Error Types
//!
//! Errors raised by the process engine, its step handlers and the collaborator
//! seams. The executor classifies every handler error into a step status via
//! [`IssuerError::is_recoverable`]: recoverable errors leave the step `TODO`
//! for the next poll, everything else finalises it as `FAILED`.

use thiserror::Error;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IssuerError {
    /// A referenced entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// The entity exists but is in a state that forbids the operation
    #[error("{0}")]
    Conflict(String),

    /// An internal invariant was violated; never retried
    #[error("{0}")]
    UnexpectedCondition(String),

    /// A collaborator (wallet, notification, callback, issuer) failed
    #[error("{service} service error: {message}")]
    Service {
        service: String,
        message: String,
        recoverable: bool,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The process row changed since it was read
    #[error("Process {0} was modified concurrently")]
    OptimisticConflict(uuid::Uuid),

    #[error("Operation cancelled")]
    Cancelled,
}

impl IssuerError {
    pub fn recoverable_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
            recoverable: false,
        }
    }

    /// Whether the failed step should stay `TODO` and be retried on the next poll
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Service {
                recoverable: true,
                ..
            }
        )
    }

    /// Engine signals abort an activation instead of being recorded on a step
    pub fn is_engine_signal(&self) -> bool {
        matches!(self, Self::OptimisticConflict(_) | Self::Cancelled)
    }
}

impl From<sqlx::Error> for IssuerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for IssuerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ConfigurationError> for IssuerError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IssuerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_recoverable_service_errors_are_recoverable() {
        assert!(IssuerError::recoverable_service("wallet", "timeout").is_recoverable());
        assert!(!IssuerError::service("wallet", "bad request").is_recoverable());
        assert!(!IssuerError::NotFound("x".into()).is_recoverable());
        assert!(!IssuerError::Conflict("x".into()).is_recoverable());
        assert!(!IssuerError::UnexpectedCondition("x".into()).is_recoverable());
        assert!(!IssuerError::Database("x".into()).is_recoverable());
    }

    #[test]
    fn test_domain_errors_display_their_message_verbatim() {
        let err = IssuerError::Conflict("CallbackUrl must be set".to_string());
        assert_eq!(err.to_string(), "CallbackUrl must be set");

        let err = IssuerError::recoverable_service("wallet", "connection reset");
        assert_eq!(err.to_string(), "wallet service error: connection reset");
    }

    #[test]
    fn test_engine_signals() {
        assert!(IssuerError::Cancelled.is_engine_signal());
        assert!(IssuerError::OptimisticConflict(uuid::Uuid::nil()).is_engine_signal());
        assert!(!IssuerError::Conflict("x".into()).is_engine_signal());
    }
}
