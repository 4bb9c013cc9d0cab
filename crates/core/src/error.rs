//! Domain error model.

use thiserror::Error;

/// Result type used by the job model.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Raised when a caller asks the job model for something its lifecycle does
/// not allow. Ledger failures are never represented here; those are
/// classified into [`ErrorKind`](crate::ErrorKind) instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty operation name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lifecycle transition is not allowed from the current state.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The job already reached `Succeeded` or `Failed`.
    #[error("job is terminal")]
    Terminal,

    /// A submit call for the job has not resolved yet.
    #[error("a submit is in flight; retry once it resolves")]
    SubmitInFlight,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
