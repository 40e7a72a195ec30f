//! procflow CLI entry point.
//!
//! Binary name: `pflow`
//!
//! Parses CLI arguments, sets up tracing, loads `engine.toml`, then
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,procflow=debug",
        _ => "trace",
    };
    procflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need configuration
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "pflow", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(procflow_infra::config::resolve_data_dir);
    let config = procflow_infra::config::load_engine_config(&data_dir).await;
    tracing::debug!(data_dir = %data_dir.display(), ?config, "loaded engine configuration");

    let result = match cli.command {
        Commands::Validate { path } => cli::validate::handle_validate(&path, &config, cli.json).await,
        Commands::Run {
            file,
            vars,
            complete,
        } => cli::run::handle_run(&file, vars.as_deref(), &complete, config, cli.json).await,
        Commands::Remind {
            cron,
            weeks,
            work_time,
            at,
            tolerance,
        } => cli::remind::handle_remind(
            &cron,
            weeks,
            work_time.as_deref(),
            at.as_deref(),
            tolerance.unwrap_or(config.reminder_tolerance_secs),
            cli.json,
        ),
        Commands::Completions { .. } => Ok(()),
    };

    procflow_observe::tracing_setup::shutdown_tracing();
    result
}
