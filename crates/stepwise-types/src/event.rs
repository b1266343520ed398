//! Execution history events.
//!
//! Every transition an execution makes is recorded as an `ExecutionEvent`,
//! persisted through the execution repository and broadcast on the event bus.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of an execution's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    /// Monotonic per execution, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What happened.
///
/// `state` names are qualified by branch position when inside a `Parallel`
/// (for example `Fanout[1]/Fetch`), so histories of concurrent branches can be
/// told apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted {
        input: serde_json::Value,
    },
    StateEntered {
        state: String,
        input: serde_json::Value,
    },
    StateExited {
        state: String,
        output: serde_json::Value,
    },
    TaskScheduled {
        state: String,
        resource: String,
        input: serde_json::Value,
    },
    TaskSucceeded {
        state: String,
        resource: String,
        output: serde_json::Value,
    },
    TaskFailed {
        state: String,
        resource: String,
        error: String,
        cause: String,
    },
    RetryScheduled {
        state: String,
        error: String,
        /// 1-based retry number for the matched retrier.
        attempt: u32,
        delay_ms: u64,
    },
    CatchMatched {
        state: String,
        error: String,
        next: String,
    },
    ChoiceMatched {
        state: String,
        next: String,
    },
    WaitStarted {
        state: String,
        until: DateTime<Utc>,
    },
    ParallelStarted {
        state: String,
        branches: usize,
    },
    ParallelBranchFailed {
        state: String,
        branch: usize,
        error: String,
    },
    ParallelSucceeded {
        state: String,
    },
    ExecutionSucceeded {
        output: serde_json::Value,
    },
    ExecutionFailed {
        error: String,
        cause: String,
    },
    ExecutionAborted,
}

impl EventKind {
    /// Short snake_case label, used for table output.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::StateEntered { .. } => "state_entered",
            EventKind::StateExited { .. } => "state_exited",
            EventKind::TaskScheduled { .. } => "task_scheduled",
            EventKind::TaskSucceeded { .. } => "task_succeeded",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::RetryScheduled { .. } => "retry_scheduled",
            EventKind::CatchMatched { .. } => "catch_matched",
            EventKind::ChoiceMatched { .. } => "choice_matched",
            EventKind::WaitStarted { .. } => "wait_started",
            EventKind::ParallelStarted { .. } => "parallel_started",
            EventKind::ParallelBranchFailed { .. } => "parallel_branch_failed",
            EventKind::ParallelSucceeded { .. } => "parallel_succeeded",
            EventKind::ExecutionSucceeded { .. } => "execution_succeeded",
            EventKind::ExecutionFailed { .. } => "execution_failed",
            EventKind::ExecutionAborted => "execution_aborted",
        }
    }

    /// The state this event belongs to, if any.
    pub fn state(&self) -> Option<&str> {
        match self {
            EventKind::StateEntered { state, .. }
            | EventKind::StateExited { state, .. }
            | EventKind::TaskScheduled { state, .. }
            | EventKind::TaskSucceeded { state, .. }
            | EventKind::TaskFailed { state, .. }
            | EventKind::RetryScheduled { state, .. }
            | EventKind::CatchMatched { state, .. }
            | EventKind::ChoiceMatched { state, .. }
            | EventKind::WaitStarted { state, .. }
            | EventKind::ParallelStarted { state, .. }
            | EventKind::ParallelBranchFailed { state, .. }
            | EventKind::ParallelSucceeded { state } => Some(state),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let event = ExecutionEvent {
            execution_id: Uuid::nil(),
            sequence: 3,
            timestamp: Utc::now(),
            kind: EventKind::RetryScheduled {
                state: "Fetch".to_string(),
                error: "States.TaskFailed".to_string(),
                attempt: 2,
                delay_ms: 4000,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "retry_scheduled");
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["delay_ms"], 4000);

        let back: ExecutionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_state_accessor() {
        let kind = EventKind::ChoiceMatched {
            state: "IsReady".to_string(),
            next: "Done".to_string(),
        };
        assert_eq!(kind.state(), Some("IsReady"));
        assert_eq!(kind.label(), "choice_matched");
        assert_eq!(EventKind::ExecutionAborted.state(), None);
    }
}
