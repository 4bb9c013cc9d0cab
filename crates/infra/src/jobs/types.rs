//! Core job types and lifecycle transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use txrelay_core::{
    ClassifiedError, DomainError, DomainResult, Identity, JobId, TransactionId,
};

use super::policy::{self, RetryDecision};

/// Job lifecycle state.
///
/// `Pending → InProgress → (Succeeded | Failed)`; never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting to be claimed
    Pending,
    /// Owned by a worker (attempting or backing off)
    InProgress,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// How a single submit attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        error: ClassifiedError,
        decision: RetryDecision,
    },
}

/// Record of a submit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub transaction_id: TransactionId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// One logical ledger-mutating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Which participant performs the call
    pub identity: Identity,
    pub operation: String,
    /// Immutable once enqueued
    pub arguments: Vec<String>,
    /// Append-only; never empty once the job leaves `Pending`
    pub transaction_ids: Vec<TransactionId>,
    pub state: JobState,
    /// Ledger payload, only when `Succeeded`
    pub result: Option<Vec<u8>>,
    /// Terminal classified error, only when `Failed`
    pub error: Option<ClassifiedError>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// A submit call for this job has not resolved yet
    pub submit_in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<AttemptRecord>,
}

impl Job {
    pub fn new(
        identity: Identity,
        operation: impl Into<String>,
        arguments: Vec<String>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            identity,
            operation: operation.into(),
            arguments,
            transaction_ids: Vec::new(),
            state: JobState::Pending,
            result: None,
            error: None,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            submit_in_flight: false,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Last transaction id; `None` while `Pending`.
    pub fn current_transaction_id(&self) -> Option<TransactionId> {
        self.transaction_ids.last().copied()
    }

    /// Take ownership: `Pending → InProgress` with the first transaction id.
    pub fn mark_claimed(&mut self, transaction_id: TransactionId) -> DomainResult<()> {
        if self.state != JobState::Pending {
            return Err(DomainError::illegal(format!(
                "cannot claim job in state {:?}",
                self.state
            )));
        }
        self.state = JobState::InProgress;
        self.transaction_ids.push(transaction_id);
        self.touch();
        Ok(())
    }

    /// Start the next submit attempt and return the transaction id to use.
    pub fn begin_attempt(&mut self) -> DomainResult<TransactionId> {
        self.ensure_in_progress()?;
        if self.submit_in_flight {
            return Err(DomainError::illegal("an attempt is already in flight"));
        }
        if self.attempt_count >= self.max_attempts {
            return Err(DomainError::illegal(format!(
                "attempt budget of {} exhausted",
                self.max_attempts
            )));
        }
        let transaction_id = self
            .current_transaction_id()
            .ok_or_else(|| DomainError::illegal("in-progress job has no transaction id"))?;

        self.attempt_count += 1;
        self.submit_in_flight = true;
        self.touch();
        Ok(transaction_id)
    }

    /// The in-flight attempt committed.
    pub fn record_success(
        &mut self,
        payload: Vec<u8>,
        started_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_in_flight()?;
        self.push_attempt(started_at, AttemptOutcome::Succeeded);
        self.submit_in_flight = false;
        self.state = JobState::Succeeded;
        self.result = Some(payload);
        self.touch();
        Ok(())
    }

    /// The in-flight attempt failed; apply the policy decision.
    ///
    /// `fresh` must be provided exactly when the decision is
    /// `RetryNewIdentity`.
    pub fn record_failure(
        &mut self,
        error: ClassifiedError,
        decision: RetryDecision,
        fresh: Option<TransactionId>,
        started_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_in_flight()?;
        match (decision, fresh) {
            (RetryDecision::RetryNewIdentity, None) => {
                return Err(DomainError::validation(
                    "a new-identity retry needs a fresh transaction id",
                ));
            }
            (RetryDecision::Stop | RetryDecision::RetrySameIdentity, Some(_)) => {
                return Err(DomainError::validation(
                    "only a new-identity retry may add a transaction id",
                ));
            }
            _ => {}
        }

        self.push_attempt(
            started_at,
            AttemptOutcome::Failed {
                error: error.clone(),
                decision,
            },
        );
        self.submit_in_flight = false;

        match decision {
            RetryDecision::Stop if policy::is_retriable(error.kind) => {
                let exhausted = ClassifiedError::retries_exhausted(self.attempt_count, &error);
                self.fail(exhausted);
            }
            RetryDecision::Stop => self.fail(error),
            RetryDecision::RetrySameIdentity => self.touch(),
            RetryDecision::RetryNewIdentity => {
                if let Some(transaction_id) = fresh {
                    self.transaction_ids.push(transaction_id);
                }
                self.touch();
            }
        }
        Ok(())
    }

    /// Withdraw the job: `Failed` with kind `Cancelled`.
    ///
    /// Allowed while `Pending` or between attempts. Rejected while a submit
    /// is in flight, since its outcome may be a commit.
    pub fn cancel(&mut self) -> DomainResult<()> {
        match self.state {
            JobState::Succeeded | JobState::Failed => Err(DomainError::Terminal),
            JobState::InProgress if self.submit_in_flight => Err(DomainError::SubmitInFlight),
            JobState::Pending | JobState::InProgress => {
                self.fail(ClassifiedError::cancelled());
                Ok(())
            }
        }
    }

    /// End the job as `Failed` when its attempt loop cannot continue.
    pub fn abort(&mut self, error: ClassifiedError) -> DomainResult<()> {
        self.ensure_in_progress()?;
        self.submit_in_flight = false;
        self.fail(error);
        Ok(())
    }

    /// Point-in-time view for callers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            identity: self.identity.clone(),
            operation: self.operation.clone(),
            state: self.state,
            attempt_count: self.attempt_count,
            transaction_ids: self.transaction_ids.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            history: self.history.clone(),
            updated_at: self.updated_at,
        }
    }

    fn fail(&mut self, error: ClassifiedError) {
        self.state = JobState::Failed;
        self.error = Some(error);
        self.touch();
    }

    fn push_attempt(&mut self, started_at: DateTime<Utc>, outcome: AttemptOutcome) {
        let now = Utc::now();
        // Invariant: begin_attempt already pushed at least one id.
        let Some(transaction_id) = self.current_transaction_id() else {
            return;
        };
        self.history.push(AttemptRecord {
            attempt: self.attempt_count,
            transaction_id,
            started_at,
            finished_at: now,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
            outcome,
        });
    }

    fn ensure_in_progress(&self) -> DomainResult<()> {
        match self.state {
            JobState::InProgress => Ok(()),
            JobState::Succeeded | JobState::Failed => Err(DomainError::Terminal),
            JobState::Pending => Err(DomainError::illegal("job has not been claimed")),
        }
    }

    fn ensure_in_flight(&self) -> DomainResult<()> {
        self.ensure_in_progress()?;
        if !self.submit_in_flight {
            return Err(DomainError::illegal("no attempt in flight"));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Caller-visible status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub identity: Identity,
    pub operation: String,
    pub state: JobState,
    pub attempt_count: u32,
    pub transaction_ids: Vec<TransactionId>,
    pub result: Option<Vec<u8>>,
    pub error: Option<ClassifiedError>,
    pub history: Vec<AttemptRecord>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Result payload decoded as UTF-8 (lossy).
    pub fn result_text(&self) -> Option<String> {
        self.result
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txrelay_core::ErrorKind;

    fn new_job(max_attempts: u32) -> Job {
        Job::new(
            Identity::new("Org1MSP"),
            "CreateAsset",
            vec!["asset1".into(), "blue".into()],
            max_attempts,
        )
    }

    fn claimed(max_attempts: u32) -> Job {
        let mut job = new_job(max_attempts);
        job.mark_claimed(TransactionId::new()).unwrap();
        job
    }

    fn transient() -> ClassifiedError {
        ClassifiedError::new(ErrorKind::TransientInfrastructure, "endorsement failed")
    }

    #[test]
    fn zero_budget_is_raised_to_one_attempt() {
        assert_eq!(new_job(0).max_attempts, 1);
    }

    #[test]
    fn abort_fails_claimed_job() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        job.abort(transient()).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(!job.submit_in_flight);
        assert_eq!(job.abort(transient()).unwrap_err(), DomainError::Terminal);
    }

    #[test]
    fn job_creation_defaults() {
        let job = new_job(5);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt_count, 0);
        assert!(job.transaction_ids.is_empty());
        assert!(job.current_transaction_id().is_none());
    }

    #[test]
    fn job_lifecycle_success() {
        let mut job = claimed(5);
        let first = job.current_transaction_id().unwrap();

        let tx = job.begin_attempt().unwrap();
        assert_eq!(tx, first);
        assert!(job.submit_in_flight);

        job.record_success(b"ok".to_vec(), Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result.as_deref(), Some(&b"ok"[..]));
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].outcome, AttemptOutcome::Succeeded);
    }

    #[test]
    fn same_identity_retry_keeps_transaction_ids() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        job.record_failure(
            ClassifiedError::new(ErrorKind::Timeout, "timed out"),
            RetryDecision::RetrySameIdentity,
            None,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(job.state, JobState::InProgress);
        assert_eq!(job.transaction_ids.len(), 1);
    }

    #[test]
    fn new_identity_retry_appends_transaction_id() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        let fresh = TransactionId::new();
        job.record_failure(transient(), RetryDecision::RetryNewIdentity, Some(fresh), Utc::now())
            .unwrap();

        assert_eq!(job.transaction_ids.len(), 2);
        assert_eq!(job.begin_attempt().unwrap(), fresh);
        assert_eq!(job.attempt_count, 2);
    }

    #[test]
    fn decision_and_fresh_id_must_agree() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        assert!(job
            .record_failure(transient(), RetryDecision::RetryNewIdentity, None, Utc::now())
            .is_err());
        assert!(job
            .record_failure(
                transient(),
                RetryDecision::Stop,
                Some(TransactionId::new()),
                Utc::now(),
            )
            .is_err());
        assert!(job.submit_in_flight);
    }

    #[test]
    fn stop_on_business_error_keeps_kind() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        let err = ClassifiedError::new(ErrorKind::AlreadyExists, "the asset asset1 already exists");
        job.record_failure(err.clone(), RetryDecision::Stop, None, Utc::now()).unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(err));
    }

    #[test]
    fn stop_on_retriable_kind_means_retries_exhausted() {
        let mut job = claimed(1);
        job.begin_attempt().unwrap();
        job.record_failure(transient(), RetryDecision::Stop, None, Utc::now()).unwrap();

        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::RetriesExhausted);
    }

    #[test]
    fn attempts_never_exceed_budget() {
        let mut job = claimed(1);
        job.begin_attempt().unwrap();
        job.record_failure(
            ClassifiedError::new(ErrorKind::Timeout, "t"),
            RetryDecision::RetrySameIdentity,
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(job.begin_attempt().is_err());
        assert_eq!(job.attempt_count, 1);
    }

    #[test]
    fn only_one_attempt_in_flight() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        assert!(job.begin_attempt().is_err());
    }

    #[test]
    fn cancel_pending_is_immediate() {
        let mut job = new_job(5);
        job.cancel().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(job.attempt_count, 0);
        assert!(job.mark_claimed(TransactionId::new()).is_err());
    }

    #[test]
    fn cancel_is_rejected_while_submit_in_flight() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        assert_eq!(job.cancel().unwrap_err(), DomainError::SubmitInFlight);
        assert_eq!(job.state, JobState::InProgress);

        // A timeout keeps the same-identity retry path; nothing is cancelled.
        job.record_failure(
            ClassifiedError::new(ErrorKind::Timeout, "t"),
            RetryDecision::RetrySameIdentity,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.state, JobState::InProgress);
        assert!(job.error.is_none());
    }

    #[test]
    fn cancel_between_attempts_is_immediate() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        job.record_failure(
            transient(),
            RetryDecision::RetryNewIdentity,
            Some(TransactionId::new()),
            Utc::now(),
        )
        .unwrap();

        job.cancel().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert!(job.begin_attempt().is_err());
    }

    #[test]
    fn terminal_jobs_reject_transitions() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        job.record_success(Vec::new(), Utc::now()).unwrap();

        assert_eq!(job.cancel().unwrap_err(), DomainError::Terminal);
        assert_eq!(job.begin_attempt().unwrap_err(), DomainError::Terminal);
    }

    #[test]
    fn snapshot_serializes_history_flat() {
        let mut job = claimed(5);
        job.begin_attempt().unwrap();
        job.record_failure(
            transient(),
            RetryDecision::RetryNewIdentity,
            Some(TransactionId::new()),
            Utc::now(),
        )
        .unwrap();

        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["state"], "in_progress");
        assert_eq!(json["history"][0]["outcome"], "failed");
        assert_eq!(json["history"][0]["decision"], "retry_new_identity");
    }
}
