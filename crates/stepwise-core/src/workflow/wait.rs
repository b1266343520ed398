//! `Wait` state timing and cancellable sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::failure::ExecutionError;
use super::model::WaitState;
use super::path::{describe, JsonPath, PathError};

/// How long a `Wait` state should pause, measured from `now`.
///
/// Timestamps in the past resolve to a zero-length wait.
pub fn resolve_wait(
    wait: &WaitState,
    input: &Value,
    context: &Value,
    now: DateTime<Utc>,
) -> Result<Duration, PathError> {
    match wait {
        WaitState::Seconds(seconds) => Ok(seconds_to_duration(*seconds)),
        WaitState::SecondsPath(path) => {
            let value = path.select(input, context)?;
            match value.as_f64() {
                Some(seconds) if seconds >= 0.0 => Ok(seconds_to_duration(seconds)),
                _ => Err(mismatch(path, "a non-negative number", value)),
            }
        }
        WaitState::Timestamp(at) => Ok(until(at.with_timezone(&Utc), now)),
        WaitState::TimestampPath(path) => {
            let value = path.select(input, context)?;
            let at = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .ok_or_else(|| mismatch(path, "an RFC 3339 timestamp", value))?;
            Ok(until(at.with_timezone(&Utc), now))
        }
    }
}

/// Sleep for `duration` unless the token fires first.
pub async fn sleep_cancellable(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), ExecutionError> {
    if duration.is_zero() {
        return if token.is_cancelled() {
            Err(ExecutionError::Aborted)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ExecutionError::Aborted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

fn mismatch(path: &JsonPath, expected: &str, found: &Value) -> PathError {
    PathError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: describe(found).to_string(),
    }
}
