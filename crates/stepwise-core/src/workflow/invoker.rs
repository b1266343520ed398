//! Task invoker: the single capability through which `Task` states reach
//! external units of work.
//!
//! Split into three layers so the interpreter can hold any invoker:
//! 1. `TaskInvoker` uses RPITIT and is implemented by concrete invokers
//! 2. An object-safe `TaskInvokerDyn` is blanket-implemented for every `TaskInvoker`
//! 3. `BoxTaskInvoker` wraps `Box<dyn TaskInvokerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

use super::failure::STATES_TASK_FAILED;

/// A failure reported by a unit: an error name used for `Retry`/`Catch`
/// matching plus free text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}: {cause}")]
pub struct TaskFailure {
    pub error: String,
    pub cause: String,
}

impl TaskFailure {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: cause.into(),
        }
    }

    /// A failure with the generic `States.TaskFailed` name.
    pub fn task_failed(cause: impl Into<String>) -> Self {
        Self::new(STATES_TASK_FAILED, cause)
    }
}

/// Executes one named unit of work.
///
/// `resource` is whatever the `Task` state resolved: the literal `Resource`
/// or the string found at `ResourcePath`. Implementations live in
/// stepwise-infra (unit registry, HTTP endpoints, routing).
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TaskInvoker: Send + Sync {
    fn invoke(
        &self,
        resource: &str,
        input: Value,
    ) -> impl Future<Output = Result<Value, TaskFailure>> + Send;
}

/// Object-safe version of [`TaskInvoker`] with boxed futures.
pub trait TaskInvokerDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a str,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TaskFailure>> + Send + 'a>>;
}

impl<T: TaskInvoker> TaskInvokerDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        resource: &'a str,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TaskFailure>> + Send + 'a>> {
        Box::pin(self.invoke(resource, input))
    }
}

/// Type-erased task invoker, so the interpreter is not generic over it.
pub struct BoxTaskInvoker {
    inner: Box<dyn TaskInvokerDyn + Send + Sync>,
}

impl BoxTaskInvoker {
    pub fn new<T: TaskInvoker + 'static>(invoker: T) -> Self {
        Self {
            inner: Box::new(invoker),
        }
    }

    pub async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
        self.inner.invoke_boxed(resource, input).await
    }
}

impl std::fmt::Debug for BoxTaskInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskInvoker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl TaskInvoker for Upper {
        async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
            match resource {
                "upper" => Ok(json!(input.as_str().unwrap_or_default().to_uppercase())),
                other => Err(TaskFailure::task_failed(format!("unknown unit '{other}'"))),
            }
        }
    }

    #[tokio::test]
    async fn boxed_invoker_delegates() {
        let invoker = BoxTaskInvoker::new(Upper);
        assert_eq!(invoker.invoke("upper", json!("abc")).await.unwrap(), json!("ABC"));

        let err = invoker.invoke("lower", json!("abc")).await.unwrap_err();
        assert_eq!(err.error, STATES_TASK_FAILED);
        assert!(err.cause.contains("lower"));
    }
}
