//! Closed taxonomy of submission error kinds.

use serde::{Deserialize, Serialize};

/// Every failure the submission layer records is one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target entity already present (deterministic business rejection).
    AlreadyExists,
    /// Target entity absent (deterministic business rejection).
    NotFound,
    /// A lookup by transaction id found nothing.
    TransactionNotFound,
    /// The ledger already committed this transaction id.
    DuplicateTransaction,
    /// Outcome unknown; the call did not confirm commit in time.
    Timeout,
    /// Failed before ordering (endorsement, connection, unrecognized failure).
    TransientInfrastructure,
    /// Attempt budget consumed without resolution.
    RetriesExhausted,
    /// Caller withdrew the job.
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::AlreadyExists,
        ErrorKind::NotFound,
        ErrorKind::TransactionNotFound,
        ErrorKind::DuplicateTransaction,
        ErrorKind::Timeout,
        ErrorKind::TransientInfrastructure,
        ErrorKind::RetriesExhausted,
        ErrorKind::Cancelled,
    ];

    /// Business rejections are reported to the caller verbatim.
    pub fn is_business(self) -> bool {
        matches!(
            self,
            ErrorKind::AlreadyExists | ErrorKind::NotFound | ErrorKind::TransactionNotFound
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransactionNotFound => "transaction_not_found",
            ErrorKind::DuplicateTransaction => "duplicate_transaction",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransientInfrastructure => "transient_infrastructure",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure after classification: the kind plus the ledger's own message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "job cancelled by caller")
    }

    /// Wrap the last classified failure once the attempt budget is gone.
    pub fn retries_exhausted(attempts: u32, last: &ClassifiedError) -> Self {
        Self::new(
            ErrorKind::RetriesExhausted,
            format!("gave up after {attempts} attempt(s); last error {last}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_kinds() {
        let business: Vec<_> = ErrorKind::ALL.into_iter().filter(|k| k.is_business()).collect();
        assert_eq!(
            business,
            vec![
                ErrorKind::AlreadyExists,
                ErrorKind::NotFound,
                ErrorKind::TransactionNotFound
            ]
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DuplicateTransaction).unwrap();
        assert_eq!(json, "\"duplicate_transaction\"");
        assert_eq!(ErrorKind::DuplicateTransaction.to_string(), "duplicate_transaction");
    }

    #[test]
    fn classified_error_display_keeps_message_verbatim() {
        let err = ClassifiedError::new(ErrorKind::AlreadyExists, "the asset a1 already exists");
        assert_eq!(err.to_string(), "already_exists: the asset a1 already exists");
    }

    #[test]
    fn retries_exhausted_mentions_last_error() {
        let last = ClassifiedError::new(ErrorKind::TransientInfrastructure, "endorse failed");
        let err = ClassifiedError::retries_exhausted(3, &last);
        assert_eq!(err.kind, ErrorKind::RetriesExhausted);
        assert!(err.message.contains("3 attempt(s)"));
        assert!(err.message.contains("endorse failed"));
    }
}
