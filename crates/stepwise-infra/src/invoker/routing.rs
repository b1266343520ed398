use serde_json::Value;
use stepwise_core::workflow::invoker::{TaskFailure, TaskInvoker};
use stepwise_types::config::StepwiseConfig;

use super::builtin::register_builtins;
use super::http::HttpInvoker;
use super::registry::UnitRegistry;

/// Dispatches a resource to the local registry first, then to HTTP endpoints.
#[derive(Debug, Clone)]
pub struct RoutingInvoker {
    registry: UnitRegistry,
    http: HttpInvoker,
}

impl RoutingInvoker {
    pub fn new(registry: UnitRegistry, http: HttpInvoker) -> Self {
        Self { registry, http }
    }

    /// Built-in units plus the HTTP endpoints listed in `config`.
    pub fn from_config(config: &StepwiseConfig) -> Self {
        let registry = UnitRegistry::new();
        register_builtins(&registry);
        Self::new(registry, HttpInvoker::new(&config.units))
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }
}

impl TaskInvoker for RoutingInvoker {
    async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
        if self.registry.contains(resource) {
            if let Some(result) = self.registry.call(resource, input.clone()).await {
                return result;
            }
        }
        if let Some(result) = self.http.call(resource, input).await {
            return result;
        }
        Err(TaskFailure::task_failed(format!("unknown unit '{resource}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::builtin::ECHO;
    use serde_json::json;
    use stepwise_core::workflow::failure::STATES_TASK_FAILED;
    use stepwise_types::config::UnitEndpoint;

    #[tokio::test]
    async fn test_registry_takes_precedence() {
        let mut config = StepwiseConfig::default();
        config.units.push(UnitEndpoint {
            name: "check".to_string(),
            // Never reached.
            url: "http://127.0.0.1:9/check".to_string(),
            timeout_secs: 1,
        });
        let invoker = RoutingInvoker::from_config(&config);
        invoker
            .registry()
            .register("check", |_| async { Ok(json!({"local": true})) });

        assert_eq!(invoker.invoke("check", json!({})).await.unwrap(), json!({"local": true}));
        assert_eq!(invoker.invoke(ECHO, json!([1])).await.unwrap(), json!([1]));
    }

    #[tokio::test]
    async fn test_unknown_unit_is_task_failed() {
        let invoker = RoutingInvoker::from_config(&StepwiseConfig::default());
        let err = invoker.invoke("send-report", json!({})).await.unwrap_err();
        assert_eq!(err.error, STATES_TASK_FAILED);
        assert!(err.cause.contains("send-report"));
    }
}
