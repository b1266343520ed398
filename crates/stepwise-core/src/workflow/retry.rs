//! Retry and catch policy engine.
//!
//! `RetryHandler` is stateless: the interpreter owns the per-state attempt
//! counters and asks the handler what to do with each failure.

use std::time::Duration;

use super::failure::{ExecutionError, STATES_ALL, STATES_TASK_FAILED};
use super::model::ResultPath;

/// One `ErrorEquals` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMatcher {
    /// `States.ALL`: anything except an abort.
    All,
    /// `States.TaskFailed`: any failure reported by an invoked unit.
    TaskFailed,
    /// Exact error name.
    Named(String),
}

impl ErrorMatcher {
    pub fn parse(name: &str) -> Self {
        match name {
            STATES_ALL => ErrorMatcher::All,
            STATES_TASK_FAILED => ErrorMatcher::TaskFailed,
            other => ErrorMatcher::Named(other.to_string()),
        }
    }

    pub fn matches(&self, error: &ExecutionError) -> bool {
        if error.is_abort() {
            return false;
        }
        match self {
            ErrorMatcher::All => true,
            ErrorMatcher::TaskFailed => {
                error.is_task_failure() || error.error_name() == STATES_TASK_FAILED
            }
            ErrorMatcher::Named(name) => error.error_name() == name,
        }
    }
}

fn any_matches(matchers: &[ErrorMatcher], error: &ExecutionError) -> bool {
    matchers.iter().any(|m| m.matches(error))
}

/// A compiled `Retry` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub error_equals: Vec<ErrorMatcher>,
    /// Delay before the first retry, in seconds.
    pub interval_seconds: f64,
    pub max_attempts: u32,
    pub backoff_rate: f64,
    /// Upper bound for any single delay, in seconds.
    pub max_delay_seconds: Option<f64>,
}

impl RetryPolicy {
    pub const DEFAULT_INTERVAL_SECONDS: f64 = 1.0;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF_RATE: f64 = 2.0;

    pub fn matches(&self, error: &ExecutionError) -> bool {
        any_matches(&self.error_equals, error)
    }
}

/// A compiled `Catch` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchRule {
    pub error_equals: Vec<ErrorMatcher>,
    pub next: String,
    /// Where the error document lands in the state's input.
    pub result_path: ResultPath,
}

impl CatchRule {
    pub fn matches(&self, error: &ExecutionError) -> bool {
        any_matches(&self.error_equals, error)
    }
}

/// What to do after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run the same state again with the same input.
    Retry {
        retrier: usize,
        /// 1-based retry number for this retrier.
        attempt: u32,
        delay: Duration,
    },
    /// Transition to the catcher at this index.
    Catch(usize),
    /// Nothing handles the failure; it leaves the current scope.
    Propagate,
}

/// Stateless policy evaluation.
pub struct RetryHandler;

impl RetryHandler {
    /// Index of the first retrier whose `ErrorEquals` matches.
    pub fn find_retrier(policies: &[RetryPolicy], error: &ExecutionError) -> Option<usize> {
        policies.iter().position(|p| p.matches(error))
    }

    /// Index of the first catcher whose `ErrorEquals` matches.
    pub fn find_catcher(catchers: &[CatchRule], error: &ExecutionError) -> Option<usize> {
        catchers.iter().position(|c| c.matches(error))
    }

    /// `interval * rate^(attempt - 1)`, capped by `MaxDelaySeconds`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut seconds = policy.interval_seconds * policy.backoff_rate.powi(exponent);
        if let Some(cap) = policy.max_delay_seconds {
            seconds = seconds.min(cap);
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Decide how to handle `error`.
    ///
    /// `attempts` holds how many retries each retrier has already spent for
    /// the current state and is advanced when a retry is chosen. Only the
    /// first matching retrier is considered; once it is exhausted the
    /// catchers get their turn.
    pub fn decide(
        policies: &[RetryPolicy],
        catchers: &[CatchRule],
        attempts: &mut [u32],
        error: &ExecutionError,
    ) -> RetryDecision {
        if let Some(index) = Self::find_retrier(policies, error) {
            let policy = &policies[index];
            let spent = attempts.get(index).copied().unwrap_or(0);
            if spent < policy.max_attempts {
                let attempt = spent + 1;
                if let Some(slot) = attempts.get_mut(index) {
                    *slot = attempt;
                }
                return RetryDecision::Retry {
                    retrier: index,
                    attempt,
                    delay: Self::backoff_delay(policy, attempt),
                };
            }
        }

        match Self::find_catcher(catchers, error) {
            Some(index) => RetryDecision::Catch(index),
            None => RetryDecision::Propagate,
        }
    }
}
