//! Error types for the MySQL operator

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a reconcile pass
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid resource specification
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Validation error for names, privileges or charsets
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Opening the backend connection failed
    #[error("Connection to MySQL failed: {0}")]
    ConnectionFailed(String),

    /// A statement against the backend failed
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    /// `SHOW GRANTS` returned a line that could not be interpreted
    #[error("Unable to parse grant line '{line}': {reason}")]
    GrantParse { line: String, reason: String },
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Wrap a backend failure for the named operation
    pub fn backend(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        OperatorError::Backend {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Check if this error is retryable without a spec change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_)
                | OperatorError::Timeout(_)
                | OperatorError::ConnectionFailed(_)
                | OperatorError::Backend { .. }
                | OperatorError::FinalizerError(_)
        )
    }

    /// Fixed requeue delay for errors that only a spec or Secret change can fix
    pub fn requeue_delay(&self) -> Option<Duration> {
        if self.is_retryable() {
            None
        } else {
            Some(Duration::from_secs(300))
        }
    }
}
