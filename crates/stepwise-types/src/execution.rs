//! Execution tracking types.
//!
//! `ExecutionRecord` is the persisted view of one run; `ErrorOutput` is the
//! `{"Error", "Cause"}` document a failed state hands to catchers and to the
//! caller.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    /// Suspended in a `Wait` state or a retry backoff.
    Waiting,
    Succeeded,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    /// Whether the run has stopped for good.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Aborted
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Waiting => write!(f, "waiting"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Aborted => write!(f, "aborted"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "waiting" => Ok(ExecutionStatus::Waiting),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "aborted" => Ok(ExecutionStatus::Aborted),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Error document produced by a failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorOutput {
    pub error: String,
    pub cause: String,
}

impl ErrorOutput {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: cause.into(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "Error": self.error, "Cause": self.cause })
    }
}

/// A single run of a definition. Used for query results and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// Unique, human-readable execution name.
    pub name: String,
    /// Name of the definition being executed.
    pub definition_name: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A freshly created record in `Pending` state.
    pub fn new(name: String, definition_name: String, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            definition_name,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            stopped_at: None,
        }
    }
}
