//! Shared CLI rendering helpers.

use comfy_table::{Cell, Color};
use console::style;
use serde_json::Value;
use stepwise_types::execution::{ErrorOutput, ExecutionStatus};

/// Colored table cell for an execution status.
pub fn status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Succeeded => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Aborted => Color::Yellow,
        ExecutionStatus::Running | ExecutionStatus::Waiting => Color::Cyan,
        ExecutionStatus::Pending => Color::DarkGrey,
    };
    Cell::new(status.to_string()).fg(color)
}

/// Styled status word for line output.
pub fn status_styled(status: ExecutionStatus) -> String {
    let s = status.to_string();
    match status {
        ExecutionStatus::Succeeded => style(s).green().bold().to_string(),
        ExecutionStatus::Failed => style(s).red().bold().to_string(),
        ExecutionStatus::Aborted => style(s).yellow().bold().to_string(),
        _ => style(s).cyan().to_string(),
    }
}

/// Print a JSON document indented under a label.
pub fn print_document(label: &str, value: &Value) {
    println!("  {}:", style(label).dim());
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    for line in pretty.lines() {
        println!("    {line}");
    }
}

pub fn print_error(error: &ErrorOutput) {
    println!("  {}: {}", style("Error").dim(), style(&error.error).red());
    if !error.cause.is_empty() {
        println!("  {}: {}", style("Cause").dim(), error.cause);
    }
}

/// Shorten a UUID to its first eight characters for tables.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
