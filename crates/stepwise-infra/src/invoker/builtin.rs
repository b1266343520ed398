//! Built-in units available to every definition.

use serde_json::Value;
use stepwise_core::workflow::invoker::TaskFailure;

use super::registry::UnitRegistry;

/// Returns its input unchanged.
pub const ECHO: &str = "stepwise:echo";

/// Fails with the `Error` and `Cause` found in its input.
pub const FAIL: &str = "stepwise:fail";

/// Add the built-in units to `registry`.
pub fn register_builtins(registry: &UnitRegistry) {
    registry.register(ECHO, |input: Value| async move { Ok(input) });
    registry.register(FAIL, |input: Value| async move { Err(failure_from(&input)) });
}

fn failure_from(input: &Value) -> TaskFailure {
    let error = input
        .get("Error")
        .and_then(Value::as_str)
        .unwrap_or("Stepwise.Failed");
    let cause = input.get("Cause").and_then(Value::as_str).unwrap_or("");
    TaskFailure::new(error, cause)
}
