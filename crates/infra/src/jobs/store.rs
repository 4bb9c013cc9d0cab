//! Job storage implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use txrelay_core::{DomainError, DomainResult, JobId, TransactionId};

use super::types::{Job, JobState};

/// Job store abstraction.
///
/// The single source of truth for job state and the serialization point per
/// job: `update` applies a mutation atomically and never to a terminal job.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job (state `Pending`).
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Apply `mutation` atomically and return the updated job.
    ///
    /// Terminal jobs are rejected with `JobStoreError::Terminal` without
    /// running the mutation. A mutation error leaves the job untouched.
    fn update(
        &self,
        job_id: JobId,
        mutation: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError>;

    /// Claim the oldest pending job, moving it to `InProgress` with an id
    /// from `next_id` as its first transaction id.
    ///
    /// `next_id` is only called when a job is claimed. Returns None if no
    /// jobs are available.
    fn claim_next(
        &self,
        next_id: &mut dyn FnMut() -> TransactionId,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job is terminal: {0}")]
    Terminal(JobId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    /// FIFO of job ids in enqueue order; cancelled entries are skipped on claim.
    queue: Mutex<VecDeque<JobId>>,
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        // Lock order: jobs, then queue.
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        if job.state != JobState::Pending {
            return Err(DomainError::illegal("only pending jobs can be enqueued").into());
        }
        let id = job.id;
        jobs.insert(id, job);
        self.queue.lock().map_err(poisoned)?.push_back(id);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        jobs.get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn update(
        &self,
        job_id: JobId,
        mutation: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.is_terminal() {
            return Err(JobStoreError::Terminal(job_id));
        }

        let mut next = job.clone();
        mutation(&mut next)?;
        *job = next;
        Ok(job.clone())
    }

    fn claim_next(
        &self,
        next_id: &mut dyn FnMut() -> TransactionId,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let mut queue = self.queue.lock().map_err(poisoned)?;

        while let Some(job_id) = queue.pop_front() {
            let Some(job) = jobs.get_mut(&job_id) else {
                continue;
            };
            if job.state != JobState::Pending {
                continue;
            }
            job.mark_claimed(next_id())?;
            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::InProgress => stats.in_progress += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(
        &self,
        job_id: JobId,
        mutation: &mut dyn FnMut(&mut Job) -> DomainResult<()>,
    ) -> Result<Job, JobStoreError> {
        (**self).update(job_id, mutation)
    }

    fn claim_next(
        &self,
        next_id: &mut dyn FnMut() -> TransactionId,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(next_id)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}
