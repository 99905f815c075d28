//! HomeLink broker: entry point.
//!
//! Listens for lamps (devices) and control panels (controllers) on one TCP
//! port, routes each controller command to the named device, and delivers the
//! device's correlated reply back to the controller that asked.
//!
//! # Usage
//!
//! ```text
//! homelink-broker [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML config file
//!   --host <IP>                   Listen address [default: 127.0.0.1]
//!   --port <PORT>                 Listen port [default: 5000]
//!   --response-timeout <SECS>     Reply wait per command [default: 10]
//!   --queue-timeout <SECS>        Busy-device wait per command [default: 10]
//! ```
//!
//! # Precedence
//!
//! CLI flag > environment variable > config file > built-in default.
//!
//! | Variable                    | Flag                 |
//! |-----------------------------|----------------------|
//! | `HOMELINK_CONFIG`           | `--config`           |
//! | `HOMELINK_HOST`             | `--host`             |
//! | `HOMELINK_PORT`             | `--port`             |
//! | `HOMELINK_RESPONSE_TIMEOUT` | `--response-timeout` |
//! | `HOMELINK_QUEUE_TIMEOUT`    | `--queue-timeout`    |
//!
//! `RUST_LOG` overrides the `broker.log_level` from the config file.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use homelink_broker::application::broker::Broker;
use homelink_broker::infrastructure::network::listener::{bind, serve};
use homelink_broker::infrastructure::storage::config::{load_config, BrokerFileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HomeLink rendezvous broker.
#[derive(Debug, Parser)]
#[command(
    name = "homelink-broker",
    about = "Routes control-panel commands to named lamps and correlates their replies",
    version
)]
struct Cli {
    /// Path to a TOML config file.  A missing file means built-in defaults.
    #[arg(long, env = "HOMELINK_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.  `0.0.0.0` accepts LAN connections.
    #[arg(long, env = "HOMELINK_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "HOMELINK_PORT")]
    port: Option<u16>,

    /// Seconds to wait for a device's reply before answering `device_timeout`.
    #[arg(long, env = "HOMELINK_RESPONSE_TIMEOUT")]
    response_timeout: Option<u64>,

    /// Seconds a command may wait behind another command to the same device
    /// before answering `device_busy`.
    #[arg(long, env = "HOMELINK_QUEUE_TIMEOUT")]
    queue_timeout: Option<u64>,
}

impl Cli {
    /// Reads the config file named by `--config`, or defaults without one.
    fn load_file_config(&self) -> anyhow::Result<BrokerFileConfig> {
        match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(BrokerFileConfig::default()),
        }
    }

    /// Applies the flags that were given on top of the file values.
    fn apply_overrides(&self, mut file: BrokerFileConfig) -> BrokerFileConfig {
        if let Some(host) = &self.host {
            file.network.host = host.clone();
        }
        if let Some(port) = self.port {
            file.network.port = port;
        }
        if let Some(secs) = self.response_timeout {
            file.broker.response_timeout_secs = secs;
        }
        if let Some(secs) = self.queue_timeout {
            file.broker.queue_timeout_secs = secs;
        }
        file
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.apply_overrides(cli.load_file_config()?);
    let log_level = file.broker.log_level.clone();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let settings = file.into_settings().context("invalid broker configuration")?;
    info!(
        "HomeLink broker starting: bind={}, response_timeout={:?}, queue_timeout={:?}",
        settings.bind_addr, settings.response_timeout, settings.queue_timeout
    );

    let listener = bind(settings.bind_addr)
        .await
        .context("broker could not start")?;
    let broker = Broker::shared(settings);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    serve(listener, broker, running).await;

    info!("HomeLink broker stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn resolve(args: &[&str]) -> anyhow::Result<homelink_broker::application::settings::BrokerSettings> {
        let cli = Cli::parse_from(args);
        let file = cli.apply_overrides(BrokerFileConfig::default());
        Ok(file.into_settings()?)
    }

    #[test]
    fn test_cli_without_flags_leaves_everything_unset() {
        let cli = Cli::parse_from(["homelink-broker"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.response_timeout.is_none());
    }

    #[test]
    fn test_defaults_bind_localhost_5000() {
        let settings = resolve(&["homelink-broker"]).unwrap();
        assert_eq!(settings.bind_addr.to_string(), "127.0.0.1:5000");
    }

    #[test]
    fn test_port_and_host_override() {
        // Arrange / Act
        let settings = resolve(&["homelink-broker", "--host", "0.0.0.0", "--port", "7000"]).unwrap();

        // Assert
        assert_eq!(settings.bind_addr.to_string(), "0.0.0.0:7000");
    }

    #[test]
    fn test_timeout_overrides() {
        let settings = resolve(&[
            "homelink-broker",
            "--response-timeout",
            "3",
            "--queue-timeout",
            "5",
        ])
        .unwrap();

        assert_eq!(settings.response_timeout, Duration::from_secs(3));
        assert_eq!(settings.queue_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_flag_wins_over_file_value() {
        // Arrange: file says 6000, flag says 7000
        let cli = Cli::parse_from(["homelink-broker", "--port", "7000"]);
        let file = BrokerFileConfig::parse("[network]\nport = 6000\n").unwrap();

        // Act
        let merged = cli.apply_overrides(file);

        // Assert
        assert_eq!(merged.network.port, 7000);
    }

    #[test]
    fn test_file_value_kept_when_flag_absent() {
        let cli = Cli::parse_from(["homelink-broker"]);
        let file = BrokerFileConfig::parse("[broker]\nqueue_timeout_secs = 2\n").unwrap();

        let merged = cli.apply_overrides(file);

        assert_eq!(merged.broker.queue_timeout_secs, 2);
    }

    #[test]
    fn test_invalid_host_is_an_error_not_a_panic() {
        let result = resolve(&["homelink-broker", "--host", "not.an.ip"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_falls_back_to_defaults() {
        let cli = Cli::parse_from([
            "homelink-broker",
            "--config",
            "/nonexistent/path/that/cannot/exist/homelink.toml",
        ]);

        let file = cli.load_file_config().unwrap();

        assert_eq!(file, BrokerFileConfig::default());
    }

    #[test]
    fn test_invalid_port_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["homelink-broker", "--port", "99999"]);
        assert!(result.is_err());
    }
}
