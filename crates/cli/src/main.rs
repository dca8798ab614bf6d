//! Storefront CLI - authenticated session client

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, debug, error};

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Sign in to the storefront API and make authenticated calls")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Configuration file (defaults to ./storefront.toml if present)
    #[arg(short = 'c', long, global = true, env = "STOREFRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Timeout for commands in seconds (0 = no timeout; `watch` never times out)
    #[arg(short = 't', long, global = true, default_value = "30")]
    timeout: u64,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.log_level.into(), cli.no_file_log, cli.log_json)?;

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };

    let outcome = if cli.timeout == 0 || cli.command.is_long_running() {
        Ok(cli.command.execute(config).await)
    } else {
        let timeout_duration = Duration::from_secs(cli.timeout);
        tokio::time::timeout(timeout_duration, cli.command.execute(config)).await
    };

    match outcome {
        Ok(Ok(())) => {
            debug!("Command completed successfully");
        }
        Ok(Err(e)) => {
            error!("Command failed: {e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
        Err(_) => {
            error!("Command timed out after {} seconds", cli.timeout);
            eprintln!("error: timed out after {} seconds", cli.timeout);
            std::process::exit(1);
        }
    }

    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
