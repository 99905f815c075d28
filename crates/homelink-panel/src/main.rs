//! HomeLink control panel: entry point.
//!
//! ```text
//! homelink-panel send LAMPADA_1 LIGAR
//! homelink-panel interactive
//! homelink-panel demo --pause-ms 1000
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use homelink_panel::application::script::{
    demo_plan, describe_reply, parse_menu_line, MenuInput, DEMO_DEVICES, MENU_COMMANDS, QUIT_WORD,
};
use homelink_panel::infrastructure::client::{PanelClient, PanelError};

/// HomeLink control panel.
#[derive(Debug, Parser)]
#[command(
    name = "homelink-panel",
    about = "Sends commands to HomeLink lamps through the broker",
    version
)]
struct Cli {
    /// Broker IP address.
    #[arg(long, global = true, default_value = "127.0.0.1", env = "HOMELINK_HOST")]
    host: String,

    /// Broker TCP port.
    #[arg(long, global = true, default_value_t = 5000, env = "HOMELINK_PORT")]
    port: u16,

    /// Seconds to wait for each reply.  Keep above the broker's response and
    /// queue timeouts combined so the broker's own verdict arrives first.
    #[arg(long, global = true, default_value_t = 25)]
    reply_timeout_secs: u64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Send one command and print the reply.
    Send {
        /// Target device, e.g. LAMPADA_1.
        device: String,
        /// Command payload, e.g. LIGAR.
        command: String,
    },
    /// Read `DEVICE COMMAND` lines from stdin until SAIR.
    Interactive,
    /// Run LIGAR, STATUS, DESLIGAR, STATUS against each device.
    Demo {
        /// Devices to exercise.  Defaults to LAMPADA_1..4.
        #[arg(long = "device")]
        devices: Vec<String>,
        /// Pause between commands, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        pause_ms: u64,
    },
}

impl Cli {
    fn broker_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid broker address: '{}:{}'", self.host, self.port))
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

/// Prints the outcome of one command.  Returns `false` when the connection
/// is gone and the session should stop.
fn report(result: Result<homelink_core::Envelope, PanelError>) -> bool {
    match result {
        Ok(reply) => {
            println!("{}", describe_reply(&reply));
            true
        }
        Err(e @ PanelError::ReplyTimeout(_)) => {
            println!("{e}");
            true
        }
        Err(e) => {
            println!("{e}");
            false
        }
    }
}

async fn run_interactive(client: &mut PanelClient) -> anyhow::Result<()> {
    println!("PAINEL DE CONTROLE");
    println!("Comandos: {}", MENU_COMMANDS.join(", "));
    println!("Formato: DISPOSITIVO COMANDO. Digite '{QUIT_WORD}' para fechar.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_menu_line(&line) {
            MenuInput::Quit => break,
            MenuInput::Empty => continue,
            MenuInput::Invalid(message) => println!("{message}"),
            MenuInput::Send(planned) => {
                if !report(client.send_command(&planned.device, &planned.command).await) {
                    break;
                }
            }
        }
    }
    println!("Painel encerrado.");
    Ok(())
}

async fn run_demo(client: &mut PanelClient, devices: &[String], pause: Duration) {
    let plan = if devices.is_empty() {
        demo_plan(&DEMO_DEVICES)
    } else {
        demo_plan(devices)
    };
    for planned in plan {
        println!("{planned}");
        if !report(client.send_command(&planned.device, &planned.command).await) {
            return;
        }
        tokio::time::sleep(pause).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let addr = cli.broker_addr()?;
    let mut client = PanelClient::connect(addr, cli.reply_timeout())
        .await
        .context("panel could not reach the broker")?;
    info!("connected to broker at {addr}");

    match cli.mode {
        Mode::Send { device, command } => {
            let reply = client.send_command(&device, &command.to_ascii_uppercase()).await?;
            println!("{}", describe_reply(&reply));
        }
        Mode::Interactive => run_interactive(&mut client).await?,
        Mode::Demo { devices, pause_ms } => {
            run_demo(&mut client, &devices, Duration::from_millis(pause_ms)).await
        }
    }
    Ok(())
}
