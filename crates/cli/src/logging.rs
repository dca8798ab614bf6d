use anyhow::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for the CLI
///
/// Logs go to stderr so command output on stdout stays scriptable, and to
/// `<data dir>/storefront/cli.log` unless file logging is disabled.
pub fn init_logging(log_level: Level, no_file_log: bool, json: bool) -> Result<()> {
    let level_str = log_level.as_str().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("storefront={level_str},storefront_core={level_str},storefront_session={level_str},storefront_http={level_str}").into()
    });

    let file_layer = if no_file_log {
        None
    } else {
        let log_file_path = get_log_file_path();
        if let Some(parent) = log_file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file_path)?;
        Some(fmt::layer().with_writer(log_file).with_ansi(false))
    };

    let (text_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(text_layer)
        .with(json_layer)
        .init();

    Ok(())
}

fn get_log_file_path() -> PathBuf {
    let base_dir = std::env::var("STOREFRONT_STATE_DIR").map_or_else(
        |_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("storefront")
        },
        PathBuf::from,
    );
    base_dir.join("cli.log")
}
