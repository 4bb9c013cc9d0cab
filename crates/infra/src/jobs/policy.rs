//! Retry decision and backoff between attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use txrelay_core::ErrorKind;

/// What the worker does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Record the failure and finish the job.
    Stop,
    /// Resubmit under the transaction id already used.
    RetrySameIdentity,
    /// Resubmit under a freshly allocated transaction id.
    RetryNewIdentity,
}

/// Whether a kind can ever lead to another attempt.
///
/// `Timeout` keeps the identity so the ledger can reject a true duplicate;
/// `TransientInfrastructure` failed before ordering, so a fresh identity is
/// safe. Everything else is a deterministic outcome or already terminal.
pub fn retry_action(kind: ErrorKind) -> RetryDecision {
    match kind {
        ErrorKind::Timeout => RetryDecision::RetrySameIdentity,
        ErrorKind::TransientInfrastructure => RetryDecision::RetryNewIdentity,
        ErrorKind::AlreadyExists
        | ErrorKind::NotFound
        | ErrorKind::TransactionNotFound
        | ErrorKind::DuplicateTransaction
        | ErrorKind::RetriesExhausted
        | ErrorKind::Cancelled => RetryDecision::Stop,
    }
}

pub fn is_retriable(kind: ErrorKind) -> bool {
    retry_action(kind) != RetryDecision::Stop
}

/// Decide the next action. Pure in `(kind, attempt_count, max_attempts)`.
pub fn decide(kind: ErrorKind, attempt_count: u32, max_attempts: u32) -> RetryDecision {
    if attempt_count >= max_attempts {
        return RetryDecision::Stop;
    }
    retry_action(kind)
}

/// Attempt budget applied to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    /// At least one attempt is always allowed.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn decide(&self, kind: ErrorKind, attempt_count: u32) -> RetryDecision {
        decide(kind, attempt_count, self.max_attempts)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff: base * attempt
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    /// Maximum delay cap (applies after jitter too)
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0); delay varies uniformly by ±jitter·delay
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with fixed delays and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry that follows attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms * f64::from(attempt),
            BackoffStrategy::Exponential => {
                // Exponent capped so the float never overflows to infinity.
                base_ms * 2_f64.powi(attempt.saturating_sub(1).min(62) as i32)
            }
        }
        .min(max_ms);

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }
}
