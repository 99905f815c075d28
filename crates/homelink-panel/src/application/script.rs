//! What the panel sends, and how it shows what came back.
//!
//! The interactive menu accepts one command per line:
//!
//! ```text
//! > LAMPADA_1 ligar
//! > LAMPADA_2 STATUS
//! > sair
//! ```
//!
//! The scripted demo walks every device through `LIGAR, STATUS, DESLIGAR,
//! STATUS`.

use std::fmt;

use homelink_core::{Envelope, EnvelopeKind};
use serde_json::Value;

/// Devices the demo addresses when none are given.
pub const DEMO_DEVICES: [&str; 4] = ["LAMPADA_1", "LAMPADA_2", "LAMPADA_3", "LAMPADA_4"];

/// Commands the demo sends to each device, in order.
pub const DEMO_COMMANDS: [&str; 4] = ["LIGAR", "STATUS", "DESLIGAR", "STATUS"];

/// Commands the menu accepts.
pub const MENU_COMMANDS: [&str; 3] = ["LIGAR", "DESLIGAR", "STATUS"];

/// Word that closes the interactive menu.
pub const QUIT_WORD: &str = "SAIR";

/// One command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub device: String,
    pub command: String,
}

impl PlannedCommand {
    pub fn new(device: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for PlannedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.device, self.command)
    }
}

/// Builds the demo run over `devices`.
pub fn demo_plan<S: AsRef<str>>(devices: &[S]) -> Vec<PlannedCommand> {
    devices
        .iter()
        .flat_map(|device| {
            DEMO_COMMANDS
                .iter()
                .map(move |command| PlannedCommand::new(device.as_ref(), *command))
        })
        .collect()
}

/// One parsed menu line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuInput {
    Send(PlannedCommand),
    Quit,
    Empty,
    /// Not understood; carries the message to show the user.
    Invalid(String),
}

/// Parses `DEVICE COMMAND` or `SAIR`.  The command is case-insensitive and
/// must be one of [`MENU_COMMANDS`]; the device name is taken as typed.
pub fn parse_menu_line(line: &str) -> MenuInput {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return MenuInput::Empty;
    };
    if first.eq_ignore_ascii_case(QUIT_WORD) {
        return MenuInput::Quit;
    }

    let (Some(command), None) = (words.next(), words.next()) else {
        return MenuInput::Invalid(format!(
            "use: DISPOSITIVO COMANDO (e.g. LAMPADA_1 LIGAR) or {QUIT_WORD}"
        ));
    };
    let command = command.to_ascii_uppercase();
    if !MENU_COMMANDS.contains(&command.as_str()) {
        return MenuInput::Invalid(format!(
            "invalid command '{command}': use {}",
            MENU_COMMANDS.join(", ")
        ));
    }
    MenuInput::Send(PlannedCommand::new(first, command))
}

/// Renders a broker reply as one terminal line.
pub fn describe_reply(reply: &Envelope) -> String {
    let device = reply.device_or_dash();
    let payload = match &reply.payload {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    match reply.kind {
        EnvelopeKind::Response => format!("{device}: {payload}"),
        EnvelopeKind::Error => format!("{device}: erro {payload}"),
        other => format!("{device}: unexpected {other} ({payload})"),
    }
}
