//! CLI command definitions for the `pflow` binary.
//!
//! Uses clap derive macros for argument parsing. Every command runs against
//! an in-memory repository, so nothing outlives the process.

pub mod remind;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Validate and exercise procflow process definitions.
#[derive(Parser)]
#[command(name = "pflow", version, about, long_about = None)]
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

    /// Data directory holding engine.toml (defaults to ~/.procflow).
    #[arg(long, global = true, env = "PROCFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a definition file, or every definition under a directory.
    Validate {
        /// Definition YAML/JSON file or directory to scan.
        path: PathBuf,
    },

    /// Deploy a definition into a scratch engine and drive one instance.
    Run {
        /// Definition YAML/JSON file.
        file: PathBuf,

        /// Initial variables as a JSON object.
        #[arg(long)]
        vars: Option<String>,

        /// Complete the open task on NODE with JSON output (repeatable, applied in order).
        #[arg(long = "complete", value_name = "NODE=JSON")]
        complete: Vec<String>,
    },

    /// Check whether a reminder cadence is due at a point in time.
    Remind {
        /// Cron expression or schedule phrase ("every weekday at 09:00").
        cron: String,

        /// ISO weekdays the reminder may fire on (1 = Monday .. 7 = Sunday).
        #[arg(long, value_delimiter = ',')]
        weeks: Vec<u8>,

        /// Working hours window, HH:MM-HH:MM.
        #[arg(long)]
        work_time: Option<String>,

        /// Instant to check, RFC 3339 (defaults to now).
        #[arg(long)]
        at: Option<String>,

        /// Look-back window in seconds (defaults to engine.toml).
        #[arg(long)]
        tolerance: Option<u64>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
