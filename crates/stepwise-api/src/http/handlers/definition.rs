//! Definition discovery handlers.
//!
//! Definitions come from the state's catalog, which recompiles a file only
//! after it changes on disk.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use stepwise_core::workflow::graph::analyze;
use stepwise_core::workflow::model::Definition;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DefinitionSummary {
    pub name: String,
    pub path: String,
    pub start_at: String,
    pub states: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DefinitionSummary {
    fn new(path: &std::path::Path, def: &Definition) -> Self {
        Self {
            name: def.name.clone(),
            path: path.display().to_string(),
            start_at: def.start_at.clone(),
            states: def.states.len(),
            comment: def.comment.clone(),
        }
    }
}

/// GET /api/v1/definitions
pub async fn list_definitions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DefinitionSummary>>>, AppError> {
    let start = Instant::now();
    let defs = state.definitions()?;
    let summaries = defs
        .iter()
        .map(|(path, def)| DefinitionSummary::new(path, def))
        .collect();
    Ok(Json(
        ApiResponse::success(summaries, start).with_link("self", "/api/v1/definitions"),
    ))
}

/// GET /api/v1/definitions/{name} - the declaration plus graph findings.
pub async fn get_definition(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let def = state
        .find_definition(&name)?
        .ok_or_else(|| AppError::NotFound(format!("Definition '{name}' not found")))?;
    let report = analyze(&def);

    let data = serde_json::json!({
        "name": def.name,
        "document": def.document,
        "unreachable": report.unreachable,
        "loops": report.loops,
    });
    Ok(Json(
        ApiResponse::success(data, start)
            .with_link("self", &format!("/api/v1/definitions/{name}")),
    ))
}
