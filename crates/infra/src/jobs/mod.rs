//! Reliable submission of ledger-mutating jobs.
//!
//! ## Design
//!
//! - Callers enqueue `(operation, identity, arguments)` and get a `JobId` back
//!   immediately; nothing on that path touches the ledger
//! - A bounded pool of worker tasks claims jobs from the store, one job per
//!   worker, and drives each through its attempts strictly sequentially
//! - Every ledger failure is classified into a closed `ErrorKind` and the retry
//!   policy decides: stop, retry with the same transaction id, or retry with a
//!   fresh one
//! - The store is the only shared mutable state; all mutation goes through its
//!   atomic per-job `update`
//!
//! ## Components
//!
//! - `Job`: the job model and its lifecycle transitions
//! - `JobStore`: persistence + FIFO claim queue (in-memory implementation)
//! - `ErrorClassifier`: ordered rules mapping raw ledger failures to kinds
//! - `RetryPolicy` / `BackoffPolicy`: retry decision and delay between attempts
//! - `TransactionIdentities`: transaction id allocation
//! - `SubmissionWorker`: the per-job attempt loop
//! - `SubmissionService`: the caller-facing facade

pub mod classifier;
pub mod identity;
pub mod policy;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;

pub use classifier::{ClassificationRule, ErrorClassifier, Matcher};
pub use identity::TransactionIdentities;
pub use policy::{BackoffPolicy, BackoffStrategy, RetryDecision, RetryPolicy};
pub use service::{EnqueueError, EvaluateError, SubmissionService};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{AttemptOutcome, AttemptRecord, Job, JobSnapshot, JobState};
pub use worker::{SubmissionConfig, SubmissionWorker, WorkerPoolHandle};
