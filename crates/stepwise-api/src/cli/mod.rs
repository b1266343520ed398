//! CLI command definitions for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod definition;
pub mod execution;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run declarative JSON workflows.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to $STEPWISE_CONFIG, then ~/.stepwise/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Export trace spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log directive for the verbosity flags.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,stepwise=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a definition file without running it.
    Validate {
        /// Path to the JSON definition.
        file: PathBuf,
    },

    /// Execute a definition and wait for the result.
    Run {
        /// Path to the JSON definition.
        file: PathBuf,

        /// Input document as inline JSON.
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the input document from a file.
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Execution name (generated when omitted).
        #[arg(long)]
        name: Option<String>,
    },

    /// Inspect recorded executions.
    #[command(alias = "exec")]
    Executions {
        #[command(subcommand)]
        action: ExecutionsCommand,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to the configured port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to the configured host).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ExecutionsCommand {
    /// List recent executions.
    #[command(alias = "ls")]
    List {
        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show one execution (by id or name).
    Show {
        target: String,
    },

    /// Show the event history of an execution (by id or name).
    History {
        target: String,
    },
}
