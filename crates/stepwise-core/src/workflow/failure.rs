//! Runtime failures of a state, and the names they are matched by.

use std::any::Any;

use thiserror::Error;

use stepwise_types::execution::ErrorOutput;

use super::intrinsics::IntrinsicError;
use super::path::PathError;

pub const STATES_ALL: &str = "States.ALL";
pub const STATES_TASK_FAILED: &str = "States.TaskFailed";
pub const STATES_PATH_RESOLUTION: &str = "States.PathResolutionError";
pub const STATES_NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
pub const STATES_INTRINSIC_FAILURE: &str = "States.IntrinsicFailure";
pub const STATES_FAIL: &str = "States.Fail";
pub const STATES_ABORTED: &str = "States.Aborted";
pub const STATES_RUNTIME: &str = "States.Runtime";

/// Why a state (and possibly the whole run) failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The invoked unit reported a failure.
    #[error("task '{resource}' failed with {error}: {cause}")]
    TaskExecution {
        resource: String,
        error: String,
        cause: String,
    },

    #[error(transparent)]
    PathResolution(#[from] PathError),

    #[error("no choice rule matched in state '{state}' and no default is declared")]
    NoChoiceMatched { state: String },

    #[error("{0}")]
    Intrinsic(String),

    /// Raised by a `Fail` state.
    #[error("{error}: {cause}")]
    Declared { error: String, cause: String },

    /// First unrecovered failure of a `Parallel` branch.
    #[error("branch {index} failed: {source}")]
    ParallelBranch {
        index: usize,
        source: Box<ExecutionError>,
    },

    #[error("execution aborted")]
    Aborted,
}

impl From<IntrinsicError> for ExecutionError {
    fn from(err: IntrinsicError) -> Self {
        match err {
            IntrinsicError::Path(path) => ExecutionError::PathResolution(path),
            other => ExecutionError::Intrinsic(other.to_string()),
        }
    }
}

impl ExecutionError {
    /// `States.Runtime` raised for a caught panic.
    pub fn panicked(context: &str, payload: &(dyn Any + Send)) -> Self {
        ExecutionError::Declared {
            error: STATES_RUNTIME.to_string(),
            cause: format!("{context} panicked: {}", panic_message(payload)),
        }
    }

    /// The name `ErrorEquals` entries are compared against.
    ///
    /// A branch failure keeps the name of the error that caused it, so a
    /// catcher written for `Lambda.Unknown` still fires when that error
    /// escapes a `Parallel`.
    pub fn error_name(&self) -> &str {
        match self {
            ExecutionError::TaskExecution { error, .. } => error,
            ExecutionError::PathResolution(_) => STATES_PATH_RESOLUTION,
            ExecutionError::NoChoiceMatched { .. } => STATES_NO_CHOICE_MATCHED,
            ExecutionError::Intrinsic(_) => STATES_INTRINSIC_FAILURE,
            ExecutionError::Declared { error, .. } => error,
            ExecutionError::ParallelBranch { source, .. } => source.error_name(),
            ExecutionError::Aborted => STATES_ABORTED,
        }
    }

    /// Free-text cause, as exposed in the error document.
    pub fn cause(&self) -> String {
        match self {
            ExecutionError::TaskExecution { cause, .. } => cause.clone(),
            ExecutionError::Declared { cause, .. } => cause.clone(),
            ExecutionError::ParallelBranch { source, .. } => source.cause(),
            other => other.to_string(),
        }
    }

    pub fn is_task_failure(&self) -> bool {
        match self {
            ExecutionError::TaskExecution { .. } => true,
            ExecutionError::ParallelBranch { source, .. } => source.is_task_failure(),
            _ => false,
        }
    }

    pub fn is_abort(&self) -> bool {
        match self {
            ExecutionError::Aborted => true,
            ExecutionError::ParallelBranch { source, .. } => source.is_abort(),
            _ => false,
        }
    }

    pub fn to_error_output(&self) -> ErrorOutput {
        ErrorOutput::new(self.error_name(), self.cause())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
