//! `txrelay-core`: primitives shared by the submission layer.
//!
//! This crate contains **pure** types (no IO, no runtime): identifiers and the
//! closed taxonomy of classified submission errors.

pub mod error;
pub mod id;
pub mod kind;

pub use error::{DomainError, DomainResult};
pub use id::{Identity, JobId, TransactionId};
pub use kind::{ClassifiedError, ErrorKind};
