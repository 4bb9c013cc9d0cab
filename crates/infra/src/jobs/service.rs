//! Caller-facing facade over the store, the ledger read path and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use txrelay_core::{ClassifiedError, Identity, JobId};
use txrelay_ledger::{GatewayRegistry, LedgerFailure};

use super::classifier::ErrorClassifier;
use super::identity::TransactionIdentities;
use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{Job, JobSnapshot};
use super::worker::{SubmissionConfig, SubmissionWorker, WorkerPoolHandle};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("no ledger connection registered for identity {0}")]
    UnknownIdentity(Identity),
    #[error("operation name must not be empty")]
    EmptyOperation,
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluateError {
    #[error("no ledger connection registered for identity {0}")]
    UnknownIdentity(Identity),
    #[error(transparent)]
    Ledger(#[from] ClassifiedError),
}

/// Entry point for callers: enqueue, poll, cancel, read.
pub struct SubmissionService<S> {
    store: S,
    gateways: GatewayRegistry,
    classifier: Arc<ErrorClassifier>,
    config: SubmissionConfig,
    worker: Arc<SubmissionWorker<S>>,
    notify: Arc<Notify>,
}

impl<S: JobStore + Clone + 'static> SubmissionService<S> {
    pub fn new(
        store: S,
        gateways: GatewayRegistry,
        classifier: ErrorClassifier,
        config: SubmissionConfig,
    ) -> Self {
        let classifier = Arc::new(classifier);
        let worker = Arc::new(SubmissionWorker::new(
            store.clone(),
            gateways.clone(),
            classifier.clone(),
            Arc::new(TransactionIdentities::new()),
            config.clone(),
        ));

        Self {
            store,
            gateways,
            classifier,
            config,
            worker,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue a ledger-mutating call. Never touches the ledger.
    pub fn enqueue(
        &self,
        operation: &str,
        identity: impl Into<Identity>,
        arguments: Vec<String>,
    ) -> Result<JobId, EnqueueError> {
        let identity = identity.into();
        if operation.trim().is_empty() {
            return Err(EnqueueError::EmptyOperation);
        }
        if !self.gateways.contains(&identity) {
            return Err(EnqueueError::UnknownIdentity(identity));
        }

        let job = Job::new(
            identity,
            operation,
            arguments,
            self.config.retry.max_attempts,
        );
        let job_id = self.store.enqueue(job)?;
        self.notify.notify_one();

        debug!(%job_id, operation, "job enqueued");
        Ok(job_id)
    }

    /// Point-in-time status; safe to poll.
    pub fn job_status(&self, job_id: JobId) -> Result<JobSnapshot, JobStoreError> {
        self.store.get(job_id).map(|job| job.snapshot())
    }

    /// Withdraw a job that is `Pending` or between attempts.
    ///
    /// Rejected with `DomainError::SubmitInFlight` while a submit is
    /// unresolved, and with `JobStoreError::Terminal` once the job finished.
    pub fn cancel(&self, job_id: JobId) -> Result<JobSnapshot, JobStoreError> {
        let job = self.store.update(job_id, &mut |job| job.cancel())?;
        info!(%job_id, attempts = job.attempt_count, "job cancelled");
        Ok(job.snapshot())
    }

    pub fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.store.stats()
    }

    /// Read-only ledger query. Single attempt; failures are classified.
    pub async fn evaluate(
        &self,
        identity: &Identity,
        operation: &str,
        arguments: &[String],
    ) -> Result<Vec<u8>, EvaluateError> {
        let gateway = self
            .gateways
            .get(identity)
            .ok_or_else(|| EvaluateError::UnknownIdentity(identity.clone()))?;

        let call = gateway.evaluate(identity, operation, arguments);
        let outcome = match tokio::time::timeout(self.config.submit_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LedgerFailure::timeout(format!("evaluate of {operation} timed out"))),
        };

        outcome.map_err(|failure| {
            let error = self.classifier.classify_error(&failure);
            debug!(%identity, operation, kind = %error.kind, "evaluate failed");
            EvaluateError::Ledger(error)
        })
    }

    /// Start the configured number of worker tasks.
    pub fn spawn_workers(&self) -> WorkerPoolHandle {
        self.worker.clone().spawn_pool(self.notify.clone())
    }

    /// The attempt loop shared by the pool, for driving jobs inline.
    pub fn worker(&self) -> &SubmissionWorker<S> {
        &self.worker
    }

    /// Poll until the job is terminal.
    pub async fn wait_for_terminal(
        &self,
        job_id: JobId,
        poll: Duration,
    ) -> Result<JobSnapshot, JobStoreError> {
        loop {
            let snapshot = self.job_status(job_id)?;
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
