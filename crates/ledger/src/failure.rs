//! Raw failure surfaced by a ledger call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-peer detail attached to an endorsement failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementDetail {
    pub address: String,
    pub msp_id: String,
    pub message: String,
}

/// An unclassified ledger failure.
///
/// Nothing here is guaranteed to be present except `message`; classification
/// is best-effort over whatever the ledger client filled in.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct LedgerFailure {
    pub message: String,
    /// Commit status code reported by the ledger, e.g. `DUPLICATE_TXID`.
    pub transaction_code: Option<String>,
    pub details: Vec<EndorsementDetail>,
    /// The call hit a deadline without confirmation of commit.
    pub timed_out: bool,
}

impl LedgerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transaction_code: None,
            details: Vec::new(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::new(message)
        }
    }

    pub fn with_transaction_code(mut self, code: impl Into<String>) -> Self {
        self.transaction_code = Some(code.into());
        self
    }

    pub fn with_detail(
        mut self,
        address: impl Into<String>,
        msp_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.details.push(EndorsementDetail {
            address: address.into(),
            msp_id: msp_id.into(),
            message: message.into(),
        });
        self
    }

    /// The top-level message followed by every detail message.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.message.as_str())
            .chain(self.details.iter().map(|d| d.message.as_str()))
    }
}
