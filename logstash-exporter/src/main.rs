//! Prometheus exporter for Logstash.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use logstash_exporter::{StartupManager, StartupOptions};

/// Prometheus exporter for Logstash.
#[derive(Parser, Debug)]
#[command(name = "logstash-exporter")]
#[command(about = "Export Logstash monitoring API data as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (YAML format).
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Reload when the configuration file changes.
    #[arg(short, long)]
    watch: bool,

    /// How often to check the configuration file for changes.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    watch_interval: Duration,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let options = StartupOptions {
        config_path: args.config,
        watch: args.watch,
        watch_interval: args.watch_interval,
        log_level: args.log_level,
    };

    let manager = StartupManager::new(options);
    manager.initialize(shutdown_signal()).await?;

    info!("Exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
