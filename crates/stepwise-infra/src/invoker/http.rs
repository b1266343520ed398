//! HTTP unit invoker.
//!
//! Each configured unit is a URL. The task input is POSTed as JSON; a 2xx
//! response body is the task output. Any other status becomes a
//! [`TaskFailure`] named after the body's `Error` (or `errorType`) field,
//! falling back to `Http.<status>`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use stepwise_core::workflow::invoker::{TaskFailure, TaskInvoker};
use stepwise_types::config::UnitEndpoint;
use tracing::debug;

/// Failure name for requests that never produced a response.
pub const HTTP_CONNECTION_ERROR: &str = "Http.ConnectionError";

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    timeout: Duration,
}

/// Invokes units hosted behind HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    endpoints: HashMap<String, Endpoint>,
    http: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(units: &[UnitEndpoint]) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("stepwise-invoker/0.1")
            .build()
            .unwrap_or_default();

        let endpoints = units
            .iter()
            .map(|u| {
                (
                    u.name.clone(),
                    Endpoint {
                        url: u.url.clone(),
                        timeout: Duration::from_secs(u.timeout_secs),
                    },
                )
            })
            .collect();

        Self { endpoints, http }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// POST `input` to the endpoint of `name`, or `None` if no such unit is configured.
    pub async fn call(&self, name: &str, input: Value) -> Option<Result<Value, TaskFailure>> {
        let endpoint = self.endpoints.get(name)?;
        Some(self.post(name, endpoint, input).await)
    }

    async fn post(&self, name: &str, endpoint: &Endpoint, input: Value) -> Result<Value, TaskFailure> {
        debug!(unit = %name, url = %endpoint.url, "Invoking HTTP unit");

        let response = self
            .http
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .json(&input)
            .send()
            .await
            .map_err(|e| TaskFailure::new(HTTP_CONNECTION_ERROR, format!("{name}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TaskFailure::new(HTTP_CONNECTION_ERROR, format!("{name}: {e}")))?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| {
                TaskFailure::task_failed(format!("{name}: response is not valid JSON: {e}"))
            });
        }

        Err(failure_from_response(status.as_u16(), &body))
    }
}

/// Build the failure for a non-2xx response.
fn failure_from_response(status: u16, body: &str) -> TaskFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |keys: &[&str]| -> Option<String> {
        let obj = parsed.as_ref()?.as_object()?;
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    let error = field(&["Error", "errorType"]).unwrap_or_else(|| format!("Http.{status}"));
    let cause = field(&["Cause", "errorMessage"]).unwrap_or_else(|| body.to_string());
    TaskFailure::new(error, cause)
}

impl TaskInvoker for HttpInvoker {
    async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
        match self.call(resource, input).await {
            Some(result) => result,
            None => Err(TaskFailure::task_failed(format!(
                "no HTTP endpoint configured for unit '{resource}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn unit(name: &str, url: String) -> UnitEndpoint {
        UnitEndpoint {
            name: name.to_string(),
            url,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_failure_from_response() {
        let f = failure_from_response(500, r#"{"Error": "Report.Corrupt", "Cause": "bad checksum"}"#);
        assert_eq!(f, TaskFailure::new("Report.Corrupt", "bad checksum"));

        let f = failure_from_response(400, r#"{"errorType": "Lambda.Unknown", "errorMessage": "x"}"#);
        assert_eq!(f, TaskFailure::new("Lambda.Unknown", "x"));

        let f = failure_from_response(503, "upstream down");
        assert_eq!(f, TaskFailure::new("Http.503", "upstream down"));
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let router = Router::new().route(
            "/check",
            post(|Json(body): Json<Value>| async move { Json(json!({"ready": true, "seen": body})) }),
        );
        let base = serve(router).await;
        let invoker = HttpInvoker::new(&[unit("check", format!("{base}/check"))]);

        let out = invoker.invoke("check", json!({"file": "a.csv"})).await.unwrap();
        assert_eq!(out, json!({"ready": true, "seen": {"file": "a.csv"}}));
    }

    #[tokio::test]
    async fn test_error_status_maps_to_failure() {
        let router = Router::new().route(
            "/check",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"Error": "Report.NotReady", "Cause": "pending"})),
                )
            }),
        );
        let base = serve(router).await;
        let invoker = HttpInvoker::new(&[unit("check", format!("{base}/check"))]);

        let err = invoker.invoke("check", json!({})).await.unwrap_err();
        assert_eq!(err, TaskFailure::new("Report.NotReady", "pending"));
    }

    #[tokio::test]
    async fn test_connection_error_and_unknown_unit() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let invoker = HttpInvoker::new(&[unit("gone", format!("http://{addr}/x"))]);
        let err = invoker.invoke("gone", json!({})).await.unwrap_err();
        assert_eq!(err.error, HTTP_CONNECTION_ERROR);

        assert!(invoker.call("other", json!({})).await.is_none());
    }
}
