//! Transaction id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use txrelay_core::TransactionId;

use super::types::Job;

/// Hands out transaction ids for first attempts and new-identity retries.
///
/// Ids are UUIDv7: generated locally without IO, unique across jobs.
#[derive(Debug, Default)]
pub struct TransactionIdentities {
    issued: AtomicU64,
}

impl TransactionIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_identity(&self) -> TransactionId {
        self.issued.fetch_add(1, Ordering::Relaxed);
        TransactionId::new()
    }

    /// Id for a first attempt or a same-identity retry.
    pub fn current_identity(job: &Job) -> Option<TransactionId> {
        job.current_transaction_id()
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use txrelay_core::Identity;

    #[test]
    fn ids_are_unique_and_counted() {
        let identities = TransactionIdentities::new();
        let ids: HashSet<_> = (0..1_000).map(|_| identities.new_identity()).collect();
        assert_eq!(ids.len(), 1_000);
        assert_eq!(identities.issued(), 1_000);
    }

    #[test]
    fn current_identity_is_last_transaction_id() {
        let identities = TransactionIdentities::new();
        let mut job = Job::new(Identity::new("Org1MSP"), "CreateAsset", vec![], 3);
        assert!(TransactionIdentities::current_identity(&job).is_none());

        let first = identities.new_identity();
        job.mark_claimed(first).unwrap();
        assert_eq!(TransactionIdentities::current_identity(&job), Some(first));

        let second = identities.new_identity();
        job.transaction_ids.push(second);
        assert_eq!(TransactionIdentities::current_identity(&job), Some(second));
    }
}
