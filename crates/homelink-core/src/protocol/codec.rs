//! Line codec for HomeLink envelopes.
//!
//! Wire format: one UTF-8 JSON object per line, terminated by `\n`.
//!
//! ```text
//! {"tipo":"COMANDO","dispositivo":"LAMPADA_1","dados":"LIGAR"}\n
//! ```
//!
//! There is no length prefix; the newline is the only framing.  Splitting the
//! byte stream into lines is the job of [`crate::transport::Connection`]; this
//! module only converts a single line to and from an [`Envelope`].
//!
//! Decoding is pure and never panics.  A decode failure is a *recoverable*
//! condition: the receiving side answers with an `ERRO malformed_envelope`
//! and keeps reading.

use thiserror::Error;

use crate::protocol::envelope::{Envelope, EnvelopeKind};

/// Errors that can occur while decoding or encoding a single envelope.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The line is not a JSON object of the envelope shape (bad syntax,
    /// unknown `tipo`, wrong field types).
    #[error("malformed envelope: {0}")]
    InvalidJson(String),

    /// The line parsed, but a field required by its `tipo` is absent.
    #[error("malformed envelope: {kind} requires field '{field}'")]
    MissingField {
        kind: EnvelopeKind,
        field: &'static str,
    },

    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one line into an [`Envelope`].
///
/// Surrounding whitespace (including a trailing `\r\n`) is ignored.
///
/// # Errors
///
/// - [`CodecError::InvalidJson`] when the text is not an envelope-shaped
///   JSON object.
/// - [`CodecError::MissingField`] when `dispositivo` is absent on
///   `REGISTRO`/`COMANDO`/`RESPOSTA`, or `correlacao` is absent on
///   `RESPOSTA`.
///
/// # Examples
///
/// ```rust
/// use homelink_core::{decode_envelope, EnvelopeKind};
///
/// let env = decode_envelope(r#"{"tipo":"COMANDO","dispositivo":"LAMPADA_1","dados":"LIGAR"}"#).unwrap();
/// assert_eq!(env.kind, EnvelopeKind::Command);
/// assert_eq!(env.payload_str(), Some("LIGAR"));
/// ```
pub fn decode_envelope(line: &str) -> Result<Envelope, CodecError> {
    let envelope: Envelope = serde_json::from_str(line.trim())
        .map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    validate(&envelope)?;
    Ok(envelope)
}

/// Encodes an [`Envelope`] as a single line **without** the trailing newline.
///
/// The transport appends the `\n`; keeping it out of here lets the same
/// function feed both the socket and log output.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails (only possible for
/// payloads containing non-string map keys, which `serde_json::Value` cannot
/// produce).
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Checks the per-kind required fields.
fn validate(envelope: &Envelope) -> Result<(), CodecError> {
    let missing = |field| CodecError::MissingField {
        kind: envelope.kind,
        field,
    };

    match envelope.kind {
        EnvelopeKind::Register | EnvelopeKind::Command => {
            require_device(envelope).ok_or_else(|| missing("dispositivo"))?;
        }
        EnvelopeKind::Response => {
            require_device(envelope).ok_or_else(|| missing("dispositivo"))?;
            envelope
                .correlation_id
                .ok_or_else(|| missing("correlacao"))?;
        }
        EnvelopeKind::Error | EnvelopeKind::Ping => {}
    }
    Ok(())
}

/// A device name must be present and non-blank.
fn require_device(envelope: &Envelope) -> Option<&str> {
    envelope
        .device
        .as_deref()
        .filter(|name| !name.trim().is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::correlation::CorrelationId;
    use serde_json::json;

    #[test]
    fn test_decode_register_from_legacy_lamp_firmware() {
        // Arrange: exactly what the async lamp sends on connect
        let line = r#"{"tipo": "REGISTRO", "dispositivo": "LAMPADA_1", "dados": {"tipo": "LAMPADA"}}"#;

        // Act
        let env = decode_envelope(line).unwrap();

        // Assert
        assert_eq!(env.kind, EnvelopeKind::Register);
        assert_eq!(env.device.as_deref(), Some("LAMPADA_1"));
        assert_eq!(env.payload, Some(json!({"tipo": "LAMPADA"})));
        assert_eq!(env.correlation_id, None);
    }

    #[test]
    fn test_decode_tolerates_trailing_crlf() {
        let env = decode_envelope("{\"tipo\":\"PING\"}\r\n").unwrap();
        assert_eq!(env.kind, EnvelopeKind::Ping);
    }

    #[test]
    fn test_decode_response_with_correlation() {
        let env = decode_envelope(
            r#"{"tipo":"RESPOSTA","dispositivo":"LAMPADA_1","dados":"LIGADA","correlacao":12}"#,
        )
        .unwrap();
        assert_eq!(env.correlation_id, Some(CorrelationId::new(12)));
        assert_eq!(env.payload_str(), Some("LIGADA"));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = decode_envelope("{not json").unwrap_err();
        assert!(matches!(err, CodecError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_tipo() {
        let err = decode_envelope(r#"{"tipo":"DESCONHECIDO"}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_missing_tipo() {
        let err = decode_envelope(r#"{"dispositivo":"LAMPADA_1"}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_command_without_device() {
        let err = decode_envelope(r#"{"tipo":"COMANDO","dados":"LIGAR"}"#).unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingField {
                kind: EnvelopeKind::Command,
                field: "dispositivo"
            }
        );
    }

    #[test]
    fn test_decode_rejects_register_with_blank_device() {
        let err = decode_envelope(r#"{"tipo":"REGISTRO","dispositivo":"   "}"#).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MissingField {
                field: "dispositivo",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_uncorrelated_response() {
        // The naive firmware reply: no correlacao means the broker cannot
        // tell which request it answers.
        let err =
            decode_envelope(r#"{"tipo":"RESPOSTA","dispositivo":"LAMPADA_1","dados":"LIGADA"}"#)
                .unwrap_err();
        assert_eq!(
            err,
            CodecError::MissingField {
                kind: EnvelopeKind::Response,
                field: "correlacao"
            }
        );
    }

    #[test]
    fn test_decode_accepts_error_without_device() {
        // Legacy broker error shape.
        let env = decode_envelope(r#"{"tipo":"ERRO","dados":"Dispositivo 'X' não encontrado."}"#)
            .unwrap();
        assert_eq!(env.kind, EnvelopeKind::Error);
        assert_eq!(env.error_code(), None);
    }

    #[test]
    fn test_decode_accepts_ping_with_device_name() {
        let env = decode_envelope(r#"{"tipo":"PING","dispositivo":"LAMPADA_3"}"#).unwrap();
        assert_eq!(env.device.as_deref(), Some("LAMPADA_3"));
    }

    #[test]
    fn test_decode_rejects_negative_correlation() {
        let err = decode_envelope(
            r#"{"tipo":"RESPOSTA","dispositivo":"L","dados":"x","correlacao":-1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidJson(_)));
    }

    #[test]
    fn test_encode_produces_single_line() {
        let env = Envelope::command("LAMPADA_1", "multi\nline payload");
        let line = encode_envelope(&env).unwrap();
        assert!(!line.contains('\n'), "newlines inside strings must be escaped");
    }

    #[test]
    fn test_encoded_command_decodes_to_same_envelope() {
        let sent = Envelope::command("LAMPADA_4", "STATUS").with_correlation(CorrelationId::new(3));
        let decoded = decode_envelope(&encode_envelope(&sent).unwrap()).unwrap();
        assert_eq!(decoded, sent);
    }
}
