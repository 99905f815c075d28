//! Infrastructure layer of the lamp: the broker session and reconnect loop.

pub mod session;
