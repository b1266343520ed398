//! In-process unit registry.
//!
//! Units are async closures registered by name. The registry is itself a
//! `TaskInvoker`, so it can be handed to the interpreter directly in tests or
//! placed in front of the HTTP invoker by [`RoutingInvoker`](super::routing::RoutingInvoker).

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use stepwise_core::workflow::invoker::{TaskFailure, TaskInvoker};

type UnitFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, TaskFailure>> + Send + Sync>;

/// Named in-process units. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: Arc<DashMap<String, UnitFn>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous unit of that name.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskFailure>> + Send + 'static,
    {
        let unit: UnitFn = Arc::new(move |input| handler(input).boxed());
        self.units.insert(name.into(), unit);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Registered unit names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run the unit called `name`, or `None` if no such unit is registered.
    pub async fn call(&self, name: &str, input: Value) -> Option<Result<Value, TaskFailure>> {
        // Clone the handler out so no map guard is held across the await.
        let unit = self.units.get(name).map(|u| Arc::clone(u.value()))?;
        Some(unit(input).await)
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.names())
            .finish()
    }
}

impl TaskInvoker for UnitRegistry {
    async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
        match self.call(resource, input).await {
            Some(result) => result,
            None => Err(TaskFailure::task_failed(format!(
                "no unit registered as '{resource}'"
            ))),
        }
    }
}
