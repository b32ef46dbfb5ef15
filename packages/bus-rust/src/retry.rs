//! Retry policies consulted by consumer bindings.

use std::time::Duration;

/// Outcome of consulting a [`RetryPolicy`] after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// Decides whether a failed consume attempt runs again.
///
/// `attempt` is 1-based and counts the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &anyhow::Error) -> RetryDecision;
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _error: &anyhow::Error) -> RetryDecision {
        RetryDecision::Stop
    }
}

/// Retries right away, up to `limit` extra attempts.
#[derive(Debug, Clone, Copy)]
pub struct ImmediateRetry {
    pub limit: u32,
}

impl RetryPolicy for ImmediateRetry {
    fn should_retry(&self, attempt: u32, _error: &anyhow::Error) -> RetryDecision {
        if attempt <= self.limit {
            RetryDecision::Retry {
                delay: Duration::ZERO,
            }
        } else {
            RetryDecision::Stop
        }
    }
}

/// Retries after a fixed interval, up to `limit` extra attempts.
#[derive(Debug, Clone, Copy)]
pub struct IntervalRetry {
    pub limit: u32,
    pub interval: Duration,
}

impl RetryPolicy for IntervalRetry {
    fn should_retry(&self, attempt: u32, _error: &anyhow::Error) -> RetryDecision {
        if attempt <= self.limit {
            RetryDecision::Retry {
                delay: self.interval,
            }
        } else {
            RetryDecision::Stop
        }
    }
}
