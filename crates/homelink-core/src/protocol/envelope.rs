//! The envelope: the one message shape every HomeLink participant speaks.
//!
//! # Wire representation
//!
//! Each envelope is a JSON object on its own line.  Field names are the
//! Portuguese names used by the existing lamp firmware and control panels:
//!
//! | Field         | Meaning                                   |
//! |---------------|-------------------------------------------|
//! | `tipo`        | [`EnvelopeKind`] discriminant             |
//! | `dispositivo` | device name, e.g. `"LAMPADA_1"`           |
//! | `dados`       | opaque payload (string or JSON object)    |
//! | `correlacao`  | [`CorrelationId`] assigned by the broker  |
//!
//! ```json
//! {"tipo":"REGISTRO","dispositivo":"LAMPADA_1","dados":{"tipo":"LAMPADA"}}
//! {"tipo":"COMANDO","dispositivo":"LAMPADA_1","dados":"LIGAR","correlacao":7}
//! {"tipo":"RESPOSTA","dispositivo":"LAMPADA_1","dados":"LIGADA","correlacao":7}
//! {"tipo":"ERRO","dispositivo":"LAMPADA_9","dados":"device_not_found"}
//! ```
//!
//! Optional fields are omitted on output rather than written as `null`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::correlation::CorrelationId;

/// Discriminant carried in the `tipo` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// A device announces itself under a name.  Also used for the broker's
    /// acknowledgment.
    #[serde(rename = "REGISTRO")]
    Register,
    /// A controller asks a device to do something.
    #[serde(rename = "COMANDO")]
    Command,
    /// A device's answer to a command.
    #[serde(rename = "RESPOSTA")]
    Response,
    /// Something went wrong; `dados` carries an [`ErrorCode`] or a
    /// device-specific reason.
    #[serde(rename = "ERRO")]
    Error,
    /// Keepalive.  Logged by the broker, never answered.
    #[serde(rename = "PING")]
    Ping,
}

impl EnvelopeKind {
    /// The wire name (`"REGISTRO"`, `"COMANDO"`, ...).
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Register => "REGISTRO",
            Self::Command => "COMANDO",
            Self::Response => "RESPOSTA",
            Self::Error => "ERRO",
            Self::Ping => "PING",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Machine-readable failure reasons the broker puts in the `dados` field of
/// an `ERRO` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The line was not valid JSON or lacked a field its `tipo` requires.
    MalformedEnvelope,
    /// No device is registered under the requested name.
    DeviceNotFound,
    /// The device did not answer within the response timeout.
    DeviceTimeout,
    /// The device's connection closed while the command was outstanding.
    DeviceDisconnected,
    /// The device stayed occupied with other controllers' commands for
    /// longer than the queue timeout.
    DeviceBusy,
    /// A well-formed envelope that makes no sense for the sender's role,
    /// e.g. a controller sending `RESPOSTA`.
    UnexpectedMessage,
}

impl ErrorCode {
    /// The wire string, e.g. `"device_not_found"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "malformed_envelope",
            Self::DeviceNotFound => "device_not_found",
            Self::DeviceTimeout => "device_timeout",
            Self::DeviceDisconnected => "device_disconnected",
            Self::DeviceBusy => "device_busy",
            Self::UnexpectedMessage => "unexpected_message",
        }
    }

    /// Parses a wire string back into a code.  Unknown strings yield `None`
    /// (devices may send their own free-form error reasons).
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "malformed_envelope" => Some(Self::MalformedEnvelope),
            "device_not_found" => Some(Self::DeviceNotFound),
            "device_timeout" => Some(Self::DeviceTimeout),
            "device_disconnected" => Some(Self::DeviceDisconnected),
            "device_busy" => Some(Self::DeviceBusy),
            "unexpected_message" => Some(Self::UnexpectedMessage),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message.
///
/// Build envelopes with the constructor helpers ([`Envelope::command`],
/// [`Envelope::response`], ...) rather than struct literals so required
/// fields are never forgotten.  Which fields a given `kind` requires is
/// enforced when decoding, see [`crate::protocol::codec::decode_envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "tipo")]
    pub kind: EnvelopeKind,

    #[serde(rename = "dispositivo", default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(rename = "dados", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(rename = "correlacao", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl Envelope {
    fn new(kind: EnvelopeKind, device: Option<String>, payload: Option<Value>) -> Self {
        Self {
            kind,
            device,
            payload,
            correlation_id: None,
        }
    }

    /// `REGISTRO` announcing `device`, with an optional descriptor payload
    /// such as `{"tipo":"LAMPADA"}`.
    pub fn register(device: impl Into<String>, payload: Option<Value>) -> Self {
        Self::new(EnvelopeKind::Register, Some(device.into()), payload)
    }

    /// `COMANDO` for `device`.
    pub fn command(device: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self::new(EnvelopeKind::Command, Some(device.into()), Some(payload.into()))
    }

    /// `RESPOSTA` from `device`.
    pub fn response(device: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self::new(EnvelopeKind::Response, Some(device.into()), Some(payload.into()))
    }

    /// `ERRO` carrying a broker [`ErrorCode`].
    pub fn error(device: Option<String>, code: ErrorCode) -> Self {
        Self::new(EnvelopeKind::Error, device, Some(Value::from(code.as_str())))
    }

    /// `ERRO` carrying an arbitrary payload (device-originated errors).
    pub fn error_payload(device: Option<String>, payload: Value) -> Self {
        Self::new(EnvelopeKind::Error, device, Some(payload))
    }

    /// `PING`, optionally naming the sender.
    pub fn ping(device: Option<String>) -> Self {
        Self::new(EnvelopeKind::Ping, device, None)
    }

    /// Returns a copy stamped with `id`.
    #[must_use]
    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// The payload when it is a JSON string, e.g. `"LIGAR"`.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Value::as_str)
    }

    /// The device name, or `"-"` for log lines when absent.
    pub fn device_or_dash(&self) -> &str {
        self.device.as_deref().unwrap_or("-")
    }

    /// For `ERRO` envelopes whose payload is a known broker code.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.kind != EnvelopeKind::Error {
            return None;
        }
        self.payload_str().and_then(ErrorCode::from_wire)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
