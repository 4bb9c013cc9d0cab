//! In-memory asset ledger with duplicate-transaction detection and scripted
//! faults, for tests and the local node.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use txrelay_core::{Identity, TransactionId};

use crate::asset::Asset;
use crate::failure::LedgerFailure;
use crate::gateway::LedgerGateway;

const PEER_ADDRESS: &str = "peer0.in-memory:7051";

/// Scripted misbehavior for the next `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Commit the transaction, then report a timeout to the caller.
    TimeoutAfterCommit,
    /// Report a timeout without committing anything.
    TimeoutBeforeCommit,
    /// Reject at endorsement with the given peer message.
    Endorsement(String),
    /// Wait this long, then process the call normally.
    Stall(Duration),
    /// Wait this long, commit, then report a timeout.
    SlowCommitThenTimeout(Duration),
}

#[derive(Debug, Default)]
struct LedgerState {
    assets: BTreeMap<String, Asset>,
    committed: HashSet<TransactionId>,
    faults: VecDeque<Fault>,
    submissions: Vec<TransactionId>,
}

/// In-memory asset ledger.
///
/// Intended for tests/dev. Clones share one world state, so the same ledger
/// can be registered under several identities.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault; each submit consumes at most one, in FIFO order.
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.push_back(fault);
        }
    }

    /// Transaction ids seen by `submit`, in call order (including failed calls).
    pub fn submissions(&self) -> Vec<TransactionId> {
        self.state
            .lock()
            .map(|s| s.submissions.clone())
            .unwrap_or_default()
    }

    pub fn is_committed(&self, transaction_id: TransactionId) -> bool {
        self.state
            .lock()
            .map(|s| s.committed.contains(&transaction_id))
            .unwrap_or(false)
    }

    pub fn asset(&self, id: &str) -> Option<Asset> {
        self.state.lock().ok().and_then(|s| s.assets.get(id).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerFailure> {
        self.state
            .lock()
            .map_err(|_| LedgerFailure::new("ledger state lock poisoned"))
    }

    fn next_fault(&self, transaction_id: TransactionId) -> Result<Option<Fault>, LedgerFailure> {
        let mut state = self.lock()?;
        state.submissions.push(transaction_id);
        Ok(state.faults.pop_front())
    }

    fn commit(
        &self,
        identity: &Identity,
        operation: &str,
        arguments: &[String],
        transaction_id: TransactionId,
    ) -> Result<Vec<u8>, LedgerFailure> {
        let mut state = self.lock()?;

        if state.committed.contains(&transaction_id) {
            return Err(LedgerFailure::new("failed to endorse transaction").with_detail(
                PEER_ADDRESS,
                identity.as_str(),
                format!("duplicate transaction found [{transaction_id}]. Creator may be replaying"),
            ));
        }

        let payload = apply(&mut state.assets, operation, arguments).map_err(|e| {
            LedgerFailure::new("failed to endorse transaction").with_detail(
                PEER_ADDRESS,
                identity.as_str(),
                format!("chaincode response 500, {}", e.message),
            )
        })?;

        state.committed.insert(transaction_id);
        debug!(%transaction_id, operation, "committed transaction");
        Ok(payload)
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn submit(
        &self,
        identity: &Identity,
        operation: &str,
        arguments: &[String],
        transaction_id: TransactionId,
    ) -> Result<Vec<u8>, LedgerFailure> {
        match self.next_fault(transaction_id)? {
            None => self.commit(identity, operation, arguments, transaction_id),
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                self.commit(identity, operation, arguments, transaction_id)
            }
            Some(Fault::Endorsement(message)) => Err(LedgerFailure::new(
                "failed to endorse transaction",
            )
            .with_detail(PEER_ADDRESS, identity.as_str(), message)),
            Some(Fault::TimeoutBeforeCommit) => Err(LedgerFailure::timeout(format!(
                "timeout waiting for commit status of {transaction_id}"
            ))),
            Some(Fault::SlowCommitThenTimeout(delay)) => {
                tokio::time::sleep(delay).await;
                self.commit(identity, operation, arguments, transaction_id)?;
                Err(LedgerFailure::timeout(format!(
                    "timeout waiting for commit status of {transaction_id}"
                )))
            }
            Some(Fault::TimeoutAfterCommit) => {
                self.commit(identity, operation, arguments, transaction_id)?;
                Err(LedgerFailure::timeout(format!(
                    "timeout waiting for commit status of {transaction_id}"
                )))
            }
        }
    }

    async fn evaluate(
        &self,
        _identity: &Identity,
        operation: &str,
        arguments: &[String],
    ) -> Result<Vec<u8>, LedgerFailure> {
        let state = self.lock()?;
        match (operation, arguments) {
            ("ReadAsset", [id]) => state
                .assets
                .get(id)
                .map(Asset::to_payload)
                .ok_or_else(|| missing(id)),
            ("AssetExists", [id]) => Ok(state.assets.contains_key(id).to_string().into_bytes()),
            ("GetAllAssets", []) => {
                let all: Vec<_> = state.assets.values().collect();
                serde_json::to_vec(&all).map_err(|e| LedgerFailure::new(e.to_string()))
            }
            ("GetTransactionByID", [tx]) => {
                let found = tx
                    .parse::<TransactionId>()
                    .ok()
                    .filter(|id| state.committed.contains(id));
                match found {
                    Some(id) => Ok(serde_json::json!({ "txId": id, "validationCode": "VALID" })
                        .to_string()
                        .into_bytes()),
                    None => Err(LedgerFailure::new(format!(
                        "Failed to get transaction with id {tx}, error Entry not found in index"
                    ))),
                }
            }
            _ => Err(unsupported(operation, arguments)),
        }
    }
}

/// Execute a mutating operation against the world state.
fn apply(
    assets: &mut BTreeMap<String, Asset>,
    operation: &str,
    arguments: &[String],
) -> Result<Vec<u8>, LedgerFailure> {
    match (operation, arguments) {
        ("CreateAsset", args) => {
            let asset = Asset::from_arguments(args)?;
            if assets.contains_key(&asset.id) {
                return Err(LedgerFailure::new(format!("the asset {} already exists", asset.id)));
            }
            let payload = asset.to_payload();
            assets.insert(asset.id.clone(), asset);
            Ok(payload)
        }
        ("UpdateAsset", args) => {
            let asset = Asset::from_arguments(args)?;
            if !assets.contains_key(&asset.id) {
                return Err(missing(&asset.id));
            }
            let payload = asset.to_payload();
            assets.insert(asset.id.clone(), asset);
            Ok(payload)
        }
        ("DeleteAsset", [id]) => assets
            .remove(id)
            .map(|_| Vec::new())
            .ok_or_else(|| missing(id)),
        ("TransferAsset", [id, new_owner]) => {
            let asset = assets.get_mut(id).ok_or_else(|| missing(id))?;
            let old_owner = std::mem::replace(&mut asset.owner, new_owner.clone());
            Ok(old_owner.into_bytes())
        }
        _ => Err(unsupported(operation, arguments)),
    }
}

fn missing(id: &str) -> LedgerFailure {
    LedgerFailure::new(format!("the asset {id} does not exist"))
}

fn unsupported(operation: &str, arguments: &[String]) -> LedgerFailure {
    LedgerFailure::new(format!(
        "unsupported operation {operation} with {} argument(s)",
        arguments.len()
    ))
}
