//! Protocol module containing the envelope type, the line codec, and
//! correlation id allocation.

pub mod codec;
pub mod correlation;
pub mod envelope;

pub use codec::{decode_envelope, encode_envelope, CodecError};
pub use correlation::{CorrelationCounter, CorrelationId};
pub use envelope::{Envelope, EnvelopeKind, ErrorCode};
