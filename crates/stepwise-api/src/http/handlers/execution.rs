//! Execution launch and inspection handlers.
//!
//! Records come from the repository; while an execution is still in flight
//! its status is overlaid with the interpreter's live view (`running` or
//! `waiting`).

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use stepwise_core::repository::execution::ExecutionRepository;
use stepwise_types::event::ExecutionEvent;
use stepwise_types::execution::ExecutionRecord;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body of `POST /executions`.
#[derive(Debug, Deserialize)]
pub struct StartExecution {
    /// Definition name as discovered in `definitions_dir`.
    pub definition: String,
    #[serde(default = "empty_object")]
    pub input: Value,
    #[serde(default)]
    pub name: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

fn with_live_status(state: &AppState, mut record: ExecutionRecord) -> ExecutionRecord {
    if let Some(live) = state.interpreter.live_status(&record.id) {
        record.status = live;
    }
    record
}

async fn load_record(state: &AppState, id: &Uuid) -> Result<ExecutionRecord, AppError> {
    state
        .interpreter
        .repo()
        .get_execution(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Execution {id} not found")))
}

/// POST /api/v1/executions - launch in the background.
pub async fn start_execution(
    State(state): State<AppState>,
    Json(body): Json<StartExecution>,
) -> Result<Json<ApiResponse<ExecutionRecord>>, AppError> {
    let start = Instant::now();
    let def = state
        .find_definition(&body.definition)?
        .ok_or_else(|| AppError::Validation(format!("Unknown definition '{}'", body.definition)))?;

    let record = state.interpreter.start(def, body.input, body.name).await?;
    tracing::info!(execution_id = %record.id, name = %record.name, "execution launched via API");

    let href = format!("/api/v1/executions/{}", record.id);
    Ok(Json(
        ApiResponse::success(record, start)
            .with_link("self", &href)
            .with_link("history", &format!("{href}/history")),
    ))
}

/// GET /api/v1/executions?limit=
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<ExecutionRecord>>>, AppError> {
    let start = Instant::now();
    let records = state
        .interpreter
        .repo()
        .list_executions(query.limit)
        .await?
        .into_iter()
        .map(|r| with_live_status(&state, r))
        .collect();
    Ok(Json(
        ApiResponse::success(records, start).with_link("self", "/api/v1/executions"),
    ))
}

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionRecord>>, AppError> {
    let start = Instant::now();
    let record = with_live_status(&state, load_record(&state, &id).await?);
    let href = format!("/api/v1/executions/{id}");
    Ok(Json(
        ApiResponse::success(record, start)
            .with_link("self", &href)
            .with_link("history", &format!("{href}/history")),
    ))
}

/// GET /api/v1/executions/{id}/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ExecutionEvent>>>, AppError> {
    let start = Instant::now();
    load_record(&state, &id).await?;
    let events = state.interpreter.repo().list_events(&id).await?;
    Ok(Json(
        ApiResponse::success(events, start)
            .with_link("execution", &format!("/api/v1/executions/{id}")),
    ))
}

/// POST /api/v1/executions/{id}/abort
pub async fn abort_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    load_record(&state, &id).await?;
    state.interpreter.abort(&id)?;
    Ok(Json(ApiResponse::success(
        serde_json::json!({ "id": id, "abort_requested": true }),
        start,
    )))
}
