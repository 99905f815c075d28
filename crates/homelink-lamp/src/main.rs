//! HomeLink lamp simulator: entry point.
//!
//! Runs one simulated lamp per `--name`, each on its own broker connection.
//!
//! ```text
//! homelink-lamp --name LAMPADA_1 --name LAMPADA_2 --port 5000
//! ```

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use homelink_lamp::application::lamp::Lamp;
use homelink_lamp::infrastructure::session::{run_lamp, LampConfig};

/// Simulated HomeLink smart lamp(s).
#[derive(Debug, Parser)]
#[command(
    name = "homelink-lamp",
    about = "Simulated smart lamp that registers with the HomeLink broker",
    version
)]
struct Cli {
    /// Device name to register.  Repeat to run several lamps.
    #[arg(long = "name", default_value = "LAMPADA_1")]
    names: Vec<String>,

    /// Broker IP address.
    #[arg(long, default_value = "127.0.0.1", env = "HOMELINK_HOST")]
    host: String,

    /// Broker TCP port.
    #[arg(long, default_value_t = 5000, env = "HOMELINK_PORT")]
    port: u16,

    /// Seconds between PING heartbeats.
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,

    /// Seconds to wait before reconnecting to the broker.
    #[arg(long, default_value_t = 5)]
    reconnect_secs: u64,
}

impl Cli {
    fn into_lamp_config(&self) -> anyhow::Result<LampConfig> {
        let broker_addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid broker address: '{}:{}'", self.host, self.port))?;
        anyhow::ensure!(self.heartbeat_secs > 0, "--heartbeat-secs must be at least 1");

        Ok(LampConfig {
            broker_addr,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            reconnect_interval: Duration::from_secs(self.reconnect_secs),
            ..LampConfig::default()
        })
    }
}

/// Clears the running flag and ends every lamp task, including lamps in the
/// middle of a session.  Returns how many tasks stopped.
async fn stop_lamps(handles: Vec<JoinHandle<()>>, running: &AtomicBool) -> usize {
    running.store(false, Ordering::Relaxed);
    let mut stopped = 0;
    for handle in handles {
        handle.abort();
        match handle.await {
            Ok(()) => stopped += 1,
            Err(e) if e.is_cancelled() => stopped += 1,
            Err(e) => warn!("lamp task failed: {e}"),
        }
    }
    stopped
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_lamp_config()?;
    info!(
        "starting {} lamp(s) against broker {}",
        cli.names.len(),
        config.broker_addr
    );

    let running = Arc::new(AtomicBool::new(true));
    let handles: Vec<_> = cli
        .names
        .iter()
        .map(|name| {
            tokio::spawn(run_lamp(
                Lamp::new(name.as_str()),
                config.clone(),
                Arc::clone(&running),
            ))
        })
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C signal")?;
    info!("received Ctrl+C; switching lamps off");
    let stopped = stop_lamps(handles, &running).await;
    info!("{stopped} lamp(s) disconnected");
    Ok(())
}
