//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stepwise_core::workflow::interpreter::InterpreterError;
use stepwise_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Interpreter refused to start or control an execution.
    Interpreter(InterpreterError),
    /// Storage failure.
    Repository(RepositoryError),
    /// Unknown execution or definition.
    NotFound(String),
    /// Malformed request.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<InterpreterError> for AppError {
    fn from(e: InterpreterError) -> Self {
        AppError::Interpreter(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{e:#}"))
    }
}

impl AppError {
    /// HTTP status, machine-readable code and message.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Interpreter(InterpreterError::NameConflict(name)) => (
                StatusCode::CONFLICT,
                "NAME_CONFLICT",
                format!("Execution name '{name}' already exists"),
            ),
            AppError::Interpreter(e @ InterpreterError::NotRunning(_)) => {
                (StatusCode::CONFLICT, "NOT_RUNNING", e.to_string())
            }
            AppError::Interpreter(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERPRETER_ERROR", e.to_string())
            }
            AppError::Repository(RepositoryError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Execution not found".to_string())
            }
            AppError::Repository(RepositoryError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg.clone())
            }
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "REPOSITORY_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
