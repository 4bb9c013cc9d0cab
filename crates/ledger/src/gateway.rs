//! Ledger gateway abstraction and per-identity routing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use txrelay_core::{Identity, TransactionId};

use crate::failure::LedgerFailure;

/// Connection to the ledger as one identity.
///
/// - `submit` is ordered and may be slow; its outcome can be ambiguous. The
///   ledger must reject a resubmitted `transaction_id` that already committed.
/// - `evaluate` is read-only and synchronous from the ledger's point of view.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn submit(
        &self,
        identity: &Identity,
        operation: &str,
        arguments: &[String],
        transaction_id: TransactionId,
    ) -> Result<Vec<u8>, LedgerFailure>;

    async fn evaluate(
        &self,
        identity: &Identity,
        operation: &str,
        arguments: &[String],
    ) -> Result<Vec<u8>, LedgerFailure>;
}

/// Routing table from identity to the connection that calls as it.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Identity, Arc<dyn LedgerGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, identity: Identity, gateway: Arc<dyn LedgerGateway>) {
        self.gateways.insert(identity, gateway);
    }

    pub fn with(mut self, identity: impl Into<Identity>, gateway: Arc<dyn LedgerGateway>) -> Self {
        self.register(identity.into(), gateway);
        self
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<dyn LedgerGateway>> {
        self.gateways.get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.gateways.contains_key(identity)
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<Identity> {
        let mut ids: Vec<_> = self.gateways.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl core::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("identities", &self.identities())
            .finish()
    }
}
