//! Network infrastructure for the broker.
//!
//! # Sub-modules
//!
//! - **`listener`** – Binds the TCP port and runs the accept loop, spawning
//!   one task per connection until the shutdown flag is cleared.
//!
//! - **`handler`** – The per-connection state machine.  Classifies the peer
//!   as device or controller from its first message, then runs the matching
//!   read loop against the shared [`Broker`](crate::application::broker::Broker).

pub mod handler;
pub mod listener;
