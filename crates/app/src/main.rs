//! Dolores voice orchestrator binary entry point.
//!
//! Wires up logging, loads configuration, and hands off to the Process
//! Supervisor. Logging is a `tracing-subscriber` registry with a stderr
//! layer and a daily-rotated file layer, pruned on startup.

use std::time::{Duration, SystemTime};

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dolores_app::config::{Cli, Settings};
use dolores_app::supervisor::{self, SupervisorError};

const LOG_DIR: &str = "logs";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging()?;
    prune_old_logs(LOG_DIR, LOG_RETENTION);

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    if cli.list_config {
        println!("{}", settings.describe());
        return Ok(());
    }

    tracing::info!(settings = %settings.describe(), "starting dolores");

    match supervisor::serve(settings).await {
        Ok(()) => Ok(()),
        Err(SupervisorError::PortInUse(port)) => {
            tracing::error!(port, "port already in use");
            std::process::exit(3);
        }
        Err(e) => Err(e.into()),
    }
}

fn init_logging() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(LOG_DIR)?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, "dolores.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Removes rotated log files in `dir` older than `retention`.
fn prune_old_logs(dir: &str, retention: Duration) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune old log file");
            }
        }
    }
}
