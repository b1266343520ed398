//! `stepwise run` and `stepwise executions ...`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::Value;

use stepwise_core::repository::execution::ExecutionRepository;
use stepwise_core::workflow::definition::load_definition_file;
use stepwise_core::workflow::interpreter::ExecutionResult;
use stepwise_types::event::{EventKind, ExecutionEvent};
use stepwise_types::execution::{ExecutionRecord, ExecutionStatus};

use super::output::{print_document, print_error, short_id, status_cell, status_styled};
use super::ExecutionsCommand;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Parse the run input: inline JSON, a JSON file, or `{}`.
pub fn read_input(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    match (inline, file) {
        (Some(text), _) => serde_json::from_str(text).context("--input is not valid JSON"),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Input file {} is not valid JSON", path.display()))
        }
        (None, None) => Ok(serde_json::json!({})),
    }
}

pub async fn handle_run(
    state: &AppState,
    file: &Path,
    input: Option<&str>,
    input_file: Option<&PathBuf>,
    name: Option<String>,
    json: bool,
) -> Result<ExecutionStatus> {
    let def = load_definition_file(file)
        .with_context(|| format!("Definition {} is invalid", file.display()))?;
    let input = read_input(input, input_file.map(PathBuf::as_path))?;

    let run = state.interpreter.execute(Arc::new(def), input, name);
    tokio::pin!(run);
    let result = tokio::select! {
        res = &mut run => res,
        _ = tokio::signal::ctrl_c() => {
            state.interpreter.abort_all();
            run.await
        }
    }
    .context("Failed to start execution")?;

    print_result(&result, json)?;
    Ok(result.status)
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "id": result.id.to_string(),
            "name": result.name,
            "status": result.status,
            "output": result.output,
            "error": result.error,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution '{}' {}",
        style(&result.name).cyan(),
        status_styled(result.status)
    );
    println!("  ID: {}", result.id);
    if let Some(error) = &result.error {
        print_error(error);
    }
    print_document("Output", &result.output);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

pub async fn handle_executions_command(
    cmd: ExecutionsCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ExecutionsCommand::List { limit } => handle_list(state, limit, json).await,
        ExecutionsCommand::Show { target } => handle_show(state, &target, json).await,
        ExecutionsCommand::History { target } => handle_history(state, &target, json).await,
    }
}

/// Look up an execution by UUID, then by name.
async fn resolve_execution(state: &AppState, target: &str) -> Result<ExecutionRecord> {
    let repo = state.interpreter.repo();
    if let Ok(id) = target.parse::<uuid::Uuid>() {
        if let Some(record) = repo
            .get_execution(&id)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get execution: {e}"))?
        {
            return Ok(record);
        }
    }
    match repo
        .get_execution_by_name(target)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get execution: {e}"))?
    {
        Some(record) => Ok(record),
        None => bail!("No execution found for '{target}'. Try a UUID or execution name."),
    }
}

async fn handle_list(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let records = state
        .interpreter
        .repo()
        .list_executions(limit)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  No executions recorded.");
        println!(
            "  Start one with: {}",
            style("stepwise run <definition.json>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Definition"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Stopped"),
        ]);

    for r in &records {
        let stopped = r
            .stopped_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            Cell::new(&r.name),
            Cell::new(&r.definition_name),
            status_cell(r.status),
            Cell::new(r.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(stopped),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(state: &AppState, target: &str, json: bool) -> Result<()> {
    let record = resolve_execution(state, target).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution '{}' {}",
        style(&record.name).cyan(),
        status_styled(record.status)
    );
    println!("  ID: {}", record.id);
    println!("  Definition: {}", record.definition_name);
    println!("  Started: {}", record.started_at.to_rfc3339());
    if let Some(stopped) = record.stopped_at {
        println!("  Stopped: {}", stopped.to_rfc3339());
    }
    if let Some(error) = &record.error {
        print_error(error);
    }
    print_document("Input", &record.input);
    if let Some(output) = &record.output {
        print_document("Output", output);
    }
    println!();
    Ok(())
}

async fn handle_history(state: &AppState, target: &str, json: bool) -> Result<()> {
    let record = resolve_execution(state, target).await?;
    let events = state
        .interpreter
        .repo()
        .list_events(&record.id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load history: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Time"),
            Cell::new("Event"),
            Cell::new("State"),
            Cell::new("Detail"),
        ]);

    for event in &events {
        table.add_row(vec![
            Cell::new(event.sequence),
            Cell::new(event.timestamp.format("%H:%M:%S%.3f").to_string()),
            Cell::new(event.kind.label()),
            Cell::new(event.kind.state().unwrap_or("-")),
            Cell::new(event_detail(event)),
        ]);
    }

    println!();
    println!("  History of '{}'", style(&record.name).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// One-line summary of the interesting fields of an event.
fn event_detail(event: &ExecutionEvent) -> String {
    match &event.kind {
        EventKind::TaskScheduled { resource, .. } | EventKind::TaskSucceeded { resource, .. } => {
            resource.clone()
        }
        EventKind::TaskFailed { resource, error, .. } => format!("{resource}: {error}"),
        EventKind::RetryScheduled { error, attempt, delay_ms, .. } => {
            format!("{error} attempt {attempt} in {delay_ms}ms")
        }
        EventKind::CatchMatched { error, next, .. } => format!("{error} -> {next}"),
        EventKind::ChoiceMatched { next, .. } => format!("-> {next}"),
        EventKind::WaitStarted { until, .. } => format!("until {}", until.to_rfc3339()),
        EventKind::ParallelStarted { branches, .. } => format!("{branches} branches"),
        EventKind::ParallelBranchFailed { branch, error, .. } => {
            format!("branch {branch}: {error}")
        }
        EventKind::ExecutionFailed { error, cause } => format!("{error}: {cause}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_input_sources() {
        assert_eq!(read_input(None, None).unwrap(), json!({}));
        assert_eq!(read_input(Some(r#"{"a": 1}"#), None).unwrap(), json!({"a": 1}));
        assert!(read_input(Some("{not json"), None).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"[1, 2]"#).unwrap();
        assert_eq!(read_input(None, Some(path.as_path())).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_event_detail() {
        let event = ExecutionEvent {
            execution_id: uuid::Uuid::nil(),
            sequence: 4,
            timestamp: chrono::Utc::now(),
            kind: EventKind::RetryScheduled {
                state: "Fetch".into(),
                error: "States.TaskFailed".into(),
                attempt: 2,
                delay_ms: 4000,
            },
        };
        assert_eq!(event_detail(&event), "States.TaskFailed attempt 2 in 4000ms");
    }
}
