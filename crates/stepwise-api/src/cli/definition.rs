//! `stepwise validate`: load-time checks without running anything.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use stepwise_core::workflow::definition::load_definition_file;
use stepwise_core::workflow::graph::analyze;
use stepwise_core::workflow::model::{Definition, Transition};

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let def = load_definition_file(file)
        .with_context(|| format!("Definition {} is invalid", file.display()))?;
    let report = analyze(&def);

    if json {
        let out = serde_json::json!({
            "name": def.name,
            "valid": true,
            "start_at": def.start_at,
            "states": def.states.len(),
            "unreachable": report.unreachable,
            "loops": report.loops,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Definition '{}' is valid",
        style("*").green().bold(),
        style(&def.name).cyan()
    );
    println!("  Start: {}", def.start_at);
    println!();
    println!("{}", states_table(&def));

    if !report.loops.is_empty() {
        println!();
        println!("  {}", style("Loops").bold());
        for cycle in &report.loops {
            println!("    {}", cycle.join(" -> "));
        }
    }
    if !report.unreachable.is_empty() {
        println!();
        println!("  {}", style("Unreachable states").yellow().bold());
        for name in &report.unreachable {
            println!("    {}", style(name).yellow());
        }
    }
    println!();

    Ok(())
}

fn states_table(def: &Definition) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Transitions"),
        ]);

    for (name, state) in &def.states {
        let mut targets: Vec<&str> = state.targets();
        targets.dedup();
        let transitions = match (&state.transition, targets.is_empty()) {
            (Some(Transition::End), true) => "(end)".to_string(),
            (None, true) => "(terminal)".to_string(),
            _ => targets.join(", "),
        };
        let name_cell = if *name == def.start_at {
            Cell::new(format!("{name} (start)")).fg(Color::Green)
        } else {
            Cell::new(name)
        };
        table.add_row(vec![
            name_cell,
            Cell::new(state.state_type().to_string()),
            Cell::new(transitions),
        ]);
    }
    table
}
