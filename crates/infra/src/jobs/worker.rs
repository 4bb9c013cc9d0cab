//! Submission worker: drives a claimed job through its attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use txrelay_core::{ClassifiedError, ErrorKind, TransactionId};
use txrelay_ledger::{GatewayRegistry, LedgerFailure};

use super::classifier::ErrorClassifier;
use super::identity::TransactionIdentities;
use super::policy::{self, BackoffPolicy, RetryDecision, RetryPolicy};
use super::store::{JobStore, JobStoreError};
use super::types::Job;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Attempt budget stamped on newly enqueued jobs
    pub retry: RetryPolicy,
    pub backoff: BackoffPolicy,
    /// Deadline for a single submit call
    pub submit_timeout: Duration,
    /// Number of worker tasks
    pub worker_concurrency: usize,
    /// How often idle workers re-check the queue
    pub poll_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            backoff: BackoffPolicy::default(),
            submit_timeout: Duration::from_secs(30),
            worker_concurrency: 2,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Request graceful shutdown and wait for every worker to stop.
    ///
    /// A worker finishes the job it currently owns (including backoff waits)
    /// before exiting.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "submission worker task failed");
            }
        }
    }
}

/// Claims jobs and submits them to the ledger.
///
/// Stateless across jobs apart from the shared store; one instance is shared
/// by every task in the pool.
pub struct SubmissionWorker<S> {
    store: S,
    gateways: GatewayRegistry,
    classifier: Arc<ErrorClassifier>,
    identities: Arc<TransactionIdentities>,
    config: SubmissionConfig,
}

impl<S: JobStore + 'static> SubmissionWorker<S> {
    pub fn new(
        store: S,
        gateways: GatewayRegistry,
        classifier: Arc<ErrorClassifier>,
        identities: Arc<TransactionIdentities>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            classifier,
            identities,
            config,
        }
    }

    /// Claim the next pending job and run it to a terminal state.
    ///
    /// A claimed job whose attempt loop fails on the store is marked `Failed`
    /// rather than left `InProgress`.
    pub async fn run_next(&self) -> Result<Option<Job>, JobStoreError> {
        let identities = &self.identities;
        let Some(job) = self.store.claim_next(&mut || identities.new_identity())? else {
            return Ok(None);
        };
        let job_id = job.id;
        debug!(%job_id, operation = %job.operation, "claimed job");

        match self.process(job).await {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                error!(%job_id, error = %e, "attempt loop failed; failing job");
                let reason = ClassifiedError::new(
                    ErrorKind::TransientInfrastructure,
                    format!("submission aborted: {e}"),
                );
                match self.store.update(job_id, &mut |j| j.abort(reason.clone())) {
                    Ok(job) => Ok(Some(job)),
                    Err(JobStoreError::Terminal(_)) => self.store.get(job_id).map(Some),
                    Err(_) => Err(e),
                }
            }
        }
    }

    /// Run attempts for a claimed job until it is terminal.
    pub async fn process(&self, job: Job) -> Result<Job, JobStoreError> {
        let job_id = job.id;

        loop {
            let mut transaction_id = None;
            let job = match self.store.update(job_id, &mut |j| {
                transaction_id = Some(j.begin_attempt()?);
                Ok(())
            }) {
                Ok(job) => job,
                // Cancelled while backing off.
                Err(JobStoreError::Terminal(_)) => return self.store.get(job_id),
                Err(e) => return Err(e),
            };
            let Some(transaction_id) = transaction_id else {
                return self.store.get(job_id);
            };

            let started_at = Utc::now();
            debug!(
                job_id = %job_id,
                attempt = job.attempt_count,
                %transaction_id,
                "submitting"
            );

            match self.submit(&job, transaction_id).await {
                Ok(payload) => {
                    let job = self.store.update(job_id, &mut |j| {
                        j.record_success(payload.clone(), started_at)
                    })?;
                    info!(
                        job_id = %job_id,
                        attempts = job.attempt_count,
                        transaction_ids = job.transaction_ids.len(),
                        "job succeeded"
                    );
                    return Ok(job);
                }
                Err(failure) => {
                    let error = self.classifier.classify_error(&failure);
                    let decision = policy::decide(error.kind, job.attempt_count, job.max_attempts);
                    debug!(
                        job_id = %job_id,
                        attempt = job.attempt_count,
                        kind = %error.kind,
                        ?decision,
                        raw = %failure,
                        "classified submit failure"
                    );

                    let fresh = (decision == RetryDecision::RetryNewIdentity)
                        .then(|| self.identities.new_identity());
                    let job = self.store.update(job_id, &mut |j| {
                        j.record_failure(error.clone(), decision, fresh, started_at)
                    })?;

                    if let Some(terminal) = &job.error {
                        warn!(
                            job_id = %job_id,
                            attempts = job.attempt_count,
                            kind = %terminal.kind,
                            error = %terminal.message,
                            "job failed"
                        );
                        return Ok(job);
                    }

                    let delay = self.config.backoff.delay_for_attempt(job.attempt_count);
                    warn!(
                        job_id = %job_id,
                        attempt = job.attempt_count,
                        max_attempts = job.max_attempts,
                        kind = %error.kind,
                        ?decision,
                        delay_ms = delay.as_millis() as u64,
                        "retry scheduled"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One bounded submit call; a missed deadline becomes a timeout failure.
    async fn submit(
        &self,
        job: &Job,
        transaction_id: TransactionId,
    ) -> Result<Vec<u8>, LedgerFailure> {
        let Some(gateway) = self.gateways.get(&job.identity) else {
            return Err(LedgerFailure::new(format!(
                "no ledger connection for identity {}",
                job.identity
            )));
        };

        let call = gateway.submit(&job.identity, &job.operation, &job.arguments, transaction_id);
        match tokio::time::timeout(self.config.submit_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LedgerFailure::timeout(format!(
                "submit of {transaction_id} timed out after {}ms",
                self.config.submit_timeout.as_millis()
            ))),
        }
    }

    /// Spawn `worker_concurrency` tasks sharing this worker.
    ///
    /// Idle tasks wake on `notify` or every `poll_interval`.
    pub fn spawn_pool(self: Arc<Self>, notify: Arc<Notify>) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..self.config.worker_concurrency.max(1))
            .map(|index| {
                let worker = self.clone();
                let notify = notify.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(index, notify, shutdown).await })
            })
            .collect();

        WorkerPoolHandle {
            shutdown: shutdown_tx,
            joins,
        }
    }

    async fn run(&self, index: usize, notify: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
        info!(worker = index, "submission worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker = index, error = %e, "submission worker failed to process job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!(worker = index, "submission worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{AttemptOutcome, JobState};
    use txrelay_core::Identity;
    use txrelay_ledger::{Fault, InMemoryLedger};

    fn config(max_attempts: u32) -> SubmissionConfig {
        SubmissionConfig {
            retry: RetryPolicy::new(max_attempts),
            backoff: BackoffPolicy::fixed(Duration::from_millis(1)),
            submit_timeout: Duration::from_millis(200),
            worker_concurrency: 1,
            poll_interval: Duration::from_millis(10),
        }
    }

    type TestWorker = SubmissionWorker<Arc<InMemoryJobStore>>;

    fn setup_with(
        max_attempts: u32,
        identities: Arc<TransactionIdentities>,
    ) -> (Arc<InMemoryJobStore>, InMemoryLedger, TestWorker) {
        let store = InMemoryJobStore::arc();
        let ledger = InMemoryLedger::new();
        let gateways = GatewayRegistry::new().with("Org1MSP", Arc::new(ledger.clone()));
        let worker = SubmissionWorker::new(
            store.clone(),
            gateways,
            Arc::new(ErrorClassifier::new()),
            identities,
            config(max_attempts),
        );
        (store, ledger, worker)
    }

    fn setup(max_attempts: u32) -> (Arc<InMemoryJobStore>, InMemoryLedger, TestWorker) {
        setup_with(max_attempts, Arc::new(TransactionIdentities::new()))
    }

    fn create(id: &str) -> Job {
        Job::new(
            Identity::new("Org1MSP"),
            "CreateAsset",
            [id, "red", "1", "Ana", "10"].iter().map(|s| s.to_string()).collect(),
            5,
        )
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let (_store, _ledger, worker) = setup(3);
        assert!(worker.run_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stalled_submit_hits_deadline_and_retries_same_identity() {
        let (store, ledger, worker) = setup(3);
        ledger.inject(Fault::Stall(Duration::from_secs(5)));
        store.enqueue(create("a1")).unwrap();

        let job = worker.run_next().await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt_count, 2);
        assert_eq!(job.transaction_ids.len(), 1);

        let first = &job.history[0];
        assert!(matches!(
            &first.outcome,
            AttemptOutcome::Failed { error, .. } if error.kind == ErrorKind::Timeout
        ));
    }

    #[tokio::test]
    async fn idle_polls_allocate_no_transaction_ids() {
        let identities = Arc::new(TransactionIdentities::new());
        let (store, _ledger, worker) = setup_with(3, identities.clone());

        for _ in 0..3 {
            assert!(worker.run_next().await.unwrap().is_none());
        }
        assert_eq!(identities.issued(), 0);

        store.enqueue(create("a1")).unwrap();
        worker.run_next().await.unwrap().unwrap();
        assert_eq!(identities.issued(), 1);
    }

    #[tokio::test]
    async fn claimed_job_is_failed_when_attempt_loop_breaks() {
        let (store, ledger, worker) = setup(3);
        let mut job = create("a1");
        job.max_attempts = 0;
        let job_id = store.enqueue(job).unwrap();

        let job = worker.run_next().await.unwrap().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::TransientInfrastructure);
        assert_eq!(store.get(job_id).unwrap().state, JobState::Failed);
        assert!(ledger.submissions().is_empty());
        assert!(worker.run_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_identity_is_transient_until_exhausted() {
        let (store, _ledger, worker) = setup(2);
        let mut job = create("a1");
        job.identity = Identity::new("Org9MSP");
        job.max_attempts = 2;
        store.enqueue(job).unwrap();

        let job = worker.run_next().await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::RetriesExhausted);
        assert_eq!(job.attempt_count, 2);
    }

    #[tokio::test]
    async fn pool_drains_queue_and_shuts_down() {
        let (store, ledger, worker) = setup(3);
        let notify = Arc::new(Notify::new());
        let pool = Arc::new(worker).spawn_pool(notify.clone());
        assert_eq!(pool.size(), 1);

        let ids: Vec<_> = (0..3)
            .map(|i| {
                let id = store.enqueue(create(&format!("asset{i}"))).unwrap();
                notify.notify_one();
                id
            })
            .collect();

        for _ in 0..200 {
            if store.stats().unwrap().succeeded == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pool.shutdown().await;

        for id in ids {
            assert_eq!(store.get(id).unwrap().state, JobState::Succeeded);
        }
        assert!(ledger.asset("asset2").is_some());
    }
}
