//! A simulated smart lamp.
//!
//! | Command    | Effect     | Reply                        |
//! |------------|------------|------------------------------|
//! | `LIGAR`    | turn on    | `LIGADA`                     |
//! | `DESLIGAR` | turn off   | `DESLIGADA`                  |
//! | `STATUS`   | none       | `LIGADA` or `DESLIGADA`      |
//! | other      | none       | `COMANDO DESCONHECIDO`       |
//!
//! Every reply echoes the correlation id of the command it answers; the
//! broker refuses replies without one.

use std::fmt;

use homelink_core::{Envelope, EnvelopeKind};
use serde_json::{json, Value};

/// Reply payload for commands the lamp does not understand.
pub const UNKNOWN_COMMAND_REPLY: &str = "COMANDO DESCONHECIDO";

/// One decoded lamp command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LampCommand {
    On,
    Off,
    Status,
    Unknown(String),
}

impl LampCommand {
    /// Reads a command from a `COMANDO` payload.  Matching is
    /// case-insensitive; non-string payloads are unknown commands.
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let Some(text) = payload.and_then(Value::as_str) else {
            return Self::Unknown(payload.map(Value::to_string).unwrap_or_default());
        };
        match text.trim().to_ascii_uppercase().as_str() {
            "LIGAR" => Self::On,
            "DESLIGAR" => Self::Off,
            "STATUS" => Self::Status,
            _ => Self::Unknown(text.to_string()),
        }
    }
}

/// Power state of the lamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LampState {
    On,
    #[default]
    Off,
}

impl LampState {
    /// Word used on the wire for this state.
    pub fn as_reply(self) -> &'static str {
        match self {
            LampState::On => "LIGADA",
            LampState::Off => "DESLIGADA",
        }
    }
}

impl fmt::Display for LampState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reply())
    }
}

/// A named lamp.  Starts off.
#[derive(Debug, Clone)]
pub struct Lamp {
    name: String,
    state: LampState,
}

impl Lamp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: LampState::Off,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LampState {
        self.state
    }

    /// Applies `command` and returns the reply payload.
    pub fn apply(&mut self, command: &LampCommand) -> &'static str {
        match command {
            LampCommand::On => {
                self.state = LampState::On;
                self.state.as_reply()
            }
            LampCommand::Off => {
                self.state = LampState::Off;
                self.state.as_reply()
            }
            LampCommand::Status => self.state.as_reply(),
            LampCommand::Unknown(_) => UNKNOWN_COMMAND_REPLY,
        }
    }

    /// The `REGISTRO` this lamp announces itself with.
    pub fn registration(&self) -> Envelope {
        Envelope::register(self.name.as_str(), Some(json!({"tipo": "LAMPADA"})))
    }

    /// Handles one envelope from the broker and returns the reply to send,
    /// if any.
    ///
    /// Only `COMANDO`s are answered.  A command without a correlation id is
    /// still applied, but the reply would be rejected by the broker, so none
    /// is produced.
    pub fn handle(&mut self, envelope: &Envelope) -> Option<Envelope> {
        if envelope.kind != EnvelopeKind::Command {
            return None;
        }
        let command = LampCommand::from_payload(envelope.payload.as_ref());
        let reply = self.apply(&command);
        let id = envelope.correlation_id?;
        Some(Envelope::response(self.name.as_str(), reply).with_correlation(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelink_core::CorrelationId;

    fn command(payload: &str, id: u64) -> Envelope {
        Envelope::command("LAMPADA_1", payload).with_correlation(CorrelationId::new(id))
    }

    #[test]
    fn test_new_lamp_is_off() {
        assert_eq!(Lamp::new("LAMPADA_1").state(), LampState::Off);
    }

    #[test]
    fn test_ligar_turns_on_and_replies_ligada() {
        // Arrange
        let mut lamp = Lamp::new("LAMPADA_1");

        // Act
        let reply = lamp.apply(&LampCommand::On);

        // Assert
        assert_eq!(reply, "LIGADA");
        assert_eq!(lamp.state(), LampState::On);
    }

    #[test]
    fn test_status_reports_without_changing_state() {
        let mut lamp = Lamp::new("LAMPADA_1");
        lamp.apply(&LampCommand::On);

        assert_eq!(lamp.apply(&LampCommand::Status), "LIGADA");
        assert_eq!(lamp.state(), LampState::On);

        lamp.apply(&LampCommand::Off);
        assert_eq!(lamp.apply(&LampCommand::Status), "DESLIGADA");
    }

    #[test]
    fn test_unknown_command_keeps_state() {
        let mut lamp = Lamp::new("LAMPADA_1");
        lamp.apply(&LampCommand::On);

        let reply = lamp.apply(&LampCommand::Unknown("PISCAR".into()));

        assert_eq!(reply, UNKNOWN_COMMAND_REPLY);
        assert_eq!(lamp.state(), LampState::On);
    }

    #[test]
    fn test_command_parsing_is_case_insensitive() {
        assert_eq!(LampCommand::from_payload(Some(&json!("ligar"))), LampCommand::On);
        assert_eq!(LampCommand::from_payload(Some(&json!(" Status "))), LampCommand::Status);
    }

    #[test]
    fn test_non_string_payload_is_unknown() {
        assert!(matches!(
            LampCommand::from_payload(Some(&json!({"acao": "LIGAR"}))),
            LampCommand::Unknown(_)
        ));
        assert!(matches!(LampCommand::from_payload(None), LampCommand::Unknown(_)));
    }

    #[test]
    fn test_handle_echoes_correlation_id() {
        // Arrange
        let mut lamp = Lamp::new("LAMPADA_1");

        // Act
        let reply = lamp.handle(&command("LIGAR", 42)).unwrap();

        // Assert
        assert_eq!(reply.kind, EnvelopeKind::Response);
        assert_eq!(reply.device.as_deref(), Some("LAMPADA_1"));
        assert_eq!(reply.payload_str(), Some("LIGADA"));
        assert_eq!(reply.correlation_id, Some(CorrelationId::new(42)));
    }

    #[test]
    fn test_handle_ignores_non_commands() {
        let mut lamp = Lamp::new("LAMPADA_1");
        assert!(lamp.handle(&Envelope::ping(None)).is_none());
        assert!(lamp
            .handle(&Envelope::register("LAMPADA_1", Some(json!("REGISTRADO"))))
            .is_none());
    }

    #[test]
    fn test_uncorrelated_command_is_applied_but_not_answered() {
        let mut lamp = Lamp::new("LAMPADA_1");

        let reply = lamp.handle(&Envelope::command("LAMPADA_1", "LIGAR"));

        assert!(reply.is_none());
        assert_eq!(lamp.state(), LampState::On);
    }

    #[test]
    fn test_registration_announces_lamp_type() {
        let reg = Lamp::new("LAMPADA_3").registration();
        assert_eq!(reg.kind, EnvelopeKind::Register);
        assert_eq!(reg.device.as_deref(), Some("LAMPADA_3"));
        assert_eq!(reg.payload, Some(json!({"tipo": "LAMPADA"})));
    }
}
