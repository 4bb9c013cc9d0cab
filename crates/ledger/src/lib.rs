//! Ledger boundary: the submit/evaluate capability the submission layer consumes.
//!
//! The real ledger (ordering, endorsement, chaincode) lives outside this
//! workspace. This crate defines the seam ([`LedgerGateway`]), the raw failure
//! value it produces ([`LedgerFailure`]), the identity-to-connection routing
//! table ([`GatewayRegistry`]), and an in-memory asset ledger used by tests and
//! the local node binary.

pub mod asset;
pub mod failure;
pub mod gateway;
pub mod in_memory;

pub use asset::Asset;
pub use failure::{EndorsementDetail, LedgerFailure};
pub use gateway::{GatewayRegistry, LedgerGateway};
pub use in_memory::{Fault, InMemoryLedger};
