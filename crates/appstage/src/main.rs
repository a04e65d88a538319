//! appstage CLI - staged hosting of apps from local folders and git

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    output::set_json_mode(cli.json);

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("appstage={},appstage_ipc={}", log_level, log_level).into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    let result = match cli.command {
        Commands::App { command } => app::execute(command).await,
        Commands::Apply(args) => apply::execute(args).await,
        Commands::Param { command } => staged::param(command).await,
        Commands::Config { command } => staged::config(command).await,
        Commands::Account { command } => staged::account(command).await,
        Commands::Settings { command } => staged::settings(command).await,
        Commands::Version { command } => version::execute(command).await,
        Commands::Sync { command } => sync::execute(command).await,
        Commands::Daemon { command } => daemon::execute(command).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
