//! # homelink-core
//!
//! Shared library for HomeLink containing the envelope protocol, the
//! newline-delimited JSON codec, and the connection abstraction every
//! participant (broker, lamp, panel) uses to talk over TCP.
//!
//! # Architecture overview (for beginners)
//!
//! HomeLink is a tiny home-automation relay.  Smart devices (lamps) and
//! control panels never talk to each other directly.  Instead, each one opens
//! a single TCP connection to the **broker**, which knows which connection
//! belongs to which device and forwards commands and replies between them.
//!
//! This crate (`homelink-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – What a message looks like.  Every message is an
//!   [`Envelope`] serialized as one JSON object on one line, e.g.
//!   `{"tipo":"COMANDO","dispositivo":"LAMPADA_1","dados":"LIGAR"}`.
//!
//! - **`transport`** – How envelopes travel.  [`Connection`] wraps a byte
//!   stream (normally a `TcpStream`) and turns it into "receive the next
//!   envelope" / "send this envelope" operations.

pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `homelink_core::Envelope` instead of `homelink_core::protocol::envelope::Envelope`.
pub use protocol::codec::{decode_envelope, encode_envelope, CodecError};
pub use protocol::correlation::{CorrelationCounter, CorrelationId};
pub use protocol::envelope::{Envelope, EnvelopeKind, ErrorCode};
pub use transport::{Connection, TransportError, DEFAULT_MAX_LINE_BYTES};
