//! The context object addressed by `$$` paths.
//!
//! Read-only from the definition's point of view. The interpreter updates the
//! `State` section on every state entry and retry; each `Parallel` branch
//! carries its own copy.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub execution_name: String,
    pub state_machine_name: String,
    pub start_time: DateTime<Utc>,
    /// Original execution input, shared between branches.
    pub input: Arc<Value>,
    pub state_name: Option<String>,
    pub entered_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        execution_name: String,
        state_machine_name: String,
        input: Arc<Value>,
    ) -> Self {
        Self {
            execution_id,
            execution_name,
            state_machine_name,
            start_time: Utc::now(),
            input,
            state_name: None,
            entered_time: None,
            retry_count: 0,
        }
    }

    pub fn enter_state(&mut self, name: &str) {
        self.state_name = Some(name.to_string());
        self.entered_time = Some(Utc::now());
        self.retry_count = 0;
    }

    /// Render as the JSON value `$$` resolves against.
    pub fn to_value(&self) -> Value {
        let rfc3339 = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Millis, true);
        json!({
            "Execution": {
                "Id": self.execution_id.to_string(),
                "Name": self.execution_name,
                "StartTime": rfc3339(&self.start_time),
                "Input": *self.input,
            },
            "StateMachine": {
                "Name": self.state_machine_name,
            },
            "State": {
                "Name": self.state_name,
                "EnteredTime": self.entered_time.as_ref().map(rfc3339),
                "RetryCount": self.retry_count,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_value_shape() {
        let id = Uuid::now_v7();
        let mut ctx = ExecutionContext::new(
            id,
            "nightly-1".to_string(),
            "nightly".to_string(),
            Arc::new(json!({"valuation_date": "2024-01-02"})),
        );
        ctx.enter_state("Check");
        ctx.retry_count = 2;

        let value = ctx.to_value();
        assert_eq!(value["Execution"]["Id"], json!(id.to_string()));
        assert_eq!(value["Execution"]["Name"], "nightly-1");
        assert_eq!(value["Execution"]["Input"]["valuation_date"], "2024-01-02");
        assert_eq!(value["StateMachine"]["Name"], "nightly");
        assert_eq!(value["State"]["Name"], "Check");
        assert_eq!(value["State"]["RetryCount"], 2);
        assert!(value["State"]["EnteredTime"].is_string());
    }

    #[test]
    fn test_enter_state_resets_retry_count() {
        let mut ctx = ExecutionContext::new(
            Uuid::nil(),
            "n".into(),
            "m".into(),
            Arc::new(Value::Null),
        );
        ctx.retry_count = 3;
        ctx.enter_state("Next");
        assert_eq!(ctx.retry_count, 0);
    }
}
