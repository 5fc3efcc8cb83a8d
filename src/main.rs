use anyhow::Result;
use clap::Parser;

// Core modules
mod cli;
mod commands;
mod config;
mod context;
mod error;
mod ui;

// Cluster and repository access
mod infrastructure;
mod k8s;

// Platform logic
mod api;
mod backing;
mod domain;
mod observability;
mod services;

use cli::{Cli, Commands};
use commands::{app, info, org, push, serve, service};
use config::CarrierConfig;
use context::Context;

/// Load the config and refuse to continue on any problem in it
fn load_config(cli: &Cli) -> Result<CarrierConfig> {
    let config = CarrierConfig::load(cli.config.as_deref())?;
    if let Err(errors) = config.validate() {
        anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => info::execute(&config),
        Commands::Serve { listen } => {
            serve::execute(Context::connect(config).await?, listen).await?
        }
        Commands::Push {
            name,
            path,
            instances,
            no_logs,
        } => {
            let ctx = Context::connect(config).await?;
            push::execute(ctx, cli.org, name, path, instances, no_logs).await?
        }
        Commands::Org { command } => org::execute(Context::connect(config).await?, command).await?,
        Commands::Service { command } => {
            service::execute(Context::connect(config).await?, cli.org, command).await?
        }
        Commands::App { command } => {
            app::execute(Context::connect(config).await?, cli.org, command).await?
        }
    }

    Ok(())
}
