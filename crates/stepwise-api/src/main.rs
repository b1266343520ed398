//! Stepwise CLI and REST API entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, loads configuration, wires the interpreter to its
//! storage and task invokers, then dispatches to a command handler or starts
//! the REST API server.

mod cli;
mod http;
mod state;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use stepwise_types::execution::ExecutionStatus;

/// How long `serve` waits for aborted executions to record their final state.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = stepwise_observe::tracing_setup::init_tracing(cli.log_directive(), cli.otel) {
        eprintln!("Warning: failed to initialise tracing: {e}");
    }

    let result = dispatch(cli).await;
    stepwise_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Commands that need no configuration or storage.
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { file } => return cli::definition::handle_validate(file, cli.json),
        _ => {}
    }

    let config = stepwise_infra::config::load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let state = AppState::init(config).await?;

    match cli.command {
        Commands::Run {
            file,
            input,
            input_file,
            name,
        } => {
            let status = cli::execution::handle_run(
                &state,
                &file,
                input.as_deref(),
                input_file.as_ref(),
                name,
                cli.json,
            )
            .await?;
            if status != ExecutionStatus::Succeeded {
                std::process::exit(1);
            }
        }

        Commands::Executions { action } => {
            cli::execution::handle_executions_command(action, &state, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;

            println!(
                "  {} Stepwise API listening on {}",
                console::style("*").green().bold(),
                console::style(format!("http://{addr}/api/v1")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state.clone());

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            drain(&state).await;
            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } | Commands::Validate { .. } => {
            unreachable!("handled above")
        }
    }

    Ok(())
}

/// Abort in-flight executions and give them a moment to record it.
async fn drain(state: &AppState) {
    let aborted = state.interpreter.abort_all();
    if aborted == 0 {
        return;
    }
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while state.interpreter.running_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if state.interpreter.running_count() > 0 {
        tracing::warn!(
            remaining = state.interpreter.running_count(),
            "executions still running at shutdown"
        );
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
