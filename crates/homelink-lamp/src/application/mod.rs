//! Application layer of the lamp: the on/off state machine.
//!
//! Nothing here touches a socket.  [`lamp::Lamp`] takes decoded envelopes and
//! returns the envelope to send back, so the whole command vocabulary is
//! tested without a broker.

pub mod lamp;
