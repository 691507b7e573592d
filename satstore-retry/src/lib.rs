//! Bounded retry and backoff logic for satstore remote uploads
//!
//! Uploads are keyed deterministically, so repeating one after a transient
//! failure overwrites the same object. This crate supplies the policy that
//! decides how often and how long to keep trying.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned once retrying has stopped
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("Operation '{operation}' failed permanently: {source}")]
    Permanent {
        operation: &'static str,
        #[source]
        source: E,
    },
    #[error("Operation '{operation}' gave up after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Unwrap the error produced by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }

    /// Number of attempts made before giving up, when known
    pub fn attempts(&self) -> Option<usize> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Permanent { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = std::result::Result<T, RetryError<E>>;

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Bounded exponential backoff policy
///
/// Retrying stops at whichever limit is hit first: `max_attempts` or
/// `max_elapsed`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        cloud_storage_policy()
    }
}

/// Policy tuned for object storage uploads
pub fn cloud_storage_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(10),
        multiplier: 1.5,
        max_elapsed: Duration::from_secs(60),
    }
}

/// Run `f` until it succeeds, fails permanently, or the policy is exhausted
///
/// `f` receives the 1-based attempt number. Blocking: waits between attempts
/// on the calling thread.
pub fn retry_blocking<T, E, F>(op_name: &'static str, policy: &RetryPolicy, mut f: F) -> RetryResult<T, E>
where
    E: std::error::Error + RetryableError + 'static,
    F: FnMut(usize) -> std::result::Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;

    let outcome = backoff::retry_notify(
        policy.backoff(),
        || {
            attempt += 1;
            debug!(operation = op_name, attempt, "Attempting operation");
            match f(attempt) {
                Ok(value) => Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        },
        |err: E, wait: Duration| {
            warn!(
                operation = op_name,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Transient failure, retrying"
            );
        },
    );

    match outcome {
        Ok(value) => {
            if attempt > 1 {
                debug!(operation = op_name, attempt, "Operation succeeded after retry");
            }
            Ok(value)
        }
        Err(backoff::Error::Permanent(source)) if source.is_transient() => Err(RetryError::Exhausted {
            operation: op_name,
            attempts: attempt,
            source,
        }),
        Err(backoff::Error::Permanent(source)) => Err(RetryError::Permanent {
            operation: op_name,
            source,
        }),
        Err(backoff::Error::Transient { err, .. }) => Err(RetryError::Exhausted {
            operation: op_name,
            attempts: attempt,
            source: err,
        }),
    }
}

/// Helper macro for building a transient error value
#[macro_export]
macro_rules! transient_error {
    ($msg:expr) => {
        $crate::SimpleError::transient($msg)
    };
}

/// Helper macro for building a permanent error value
#[macro_export]
macro_rules! permanent_error {
    ($msg:expr) => {
        $crate::SimpleError::permanent($msg)
    };
}

/// Minimal error carrying its own transient flag
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SimpleError {
    pub message: String,
    pub transient: bool,
}

impl SimpleError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl RetryableError for SimpleError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
    }

    #[test]
    fn test_successful_operation() {
        let result: RetryResult<&str, SimpleError> =
            retry_blocking("test_op", &fast_policy(3), |_attempt| Ok("success"));

        assert_eq!(result.unwrap(), "success");
    }

    #[test]
    fn test_transient_failure_then_success() {
        let mut calls = 0;
        let result = retry_blocking("test_op", &fast_policy(3), |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(transient_error!("connection reset"))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_failure_stops_immediately() {
        let mut calls = 0;
        let result: RetryResult<(), SimpleError> = retry_blocking("test_op", &fast_policy(5), |_| {
            calls += 1;
            Err(permanent_error!("access denied"))
        });

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Permanent { .. })));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut calls = 0;
        let result: RetryResult<(), SimpleError> = retry_blocking("test_op", &fast_policy(3), |_| {
            calls += 1;
            Err(transient_error!("timed out"))
        });

        assert_eq!(calls, 3);
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.into_inner().message, "timed out");
    }

    #[test]
    fn test_no_retry_policy_runs_once() {
        let mut calls = 0;
        let result: RetryResult<(), SimpleError> = retry_blocking("test_op", &RetryPolicy::no_retry(), |_| {
            calls += 1;
            Err(transient_error!("timed out"))
        });

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }
}
