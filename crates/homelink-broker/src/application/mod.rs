//! Application layer of the broker.
//!
//! # What lives here? (for beginners)
//!
//! Everything the broker *decides*, and nothing it *does* on a socket.  The
//! modules below own the registry, the pending-reply table, and the
//! correlation protocol.  They talk to device connections only through
//! `tokio::sync::mpsc` outboxes, so every rule can be tested with in-memory
//! channels and a paused clock.
//!
//! # Sub-modules
//!
//! - **`registry`** – Device name → connection routing table.
//! - **`pending`**  – Forwarded commands awaiting a reply, keyed by
//!   correlation id, resolved exactly once.
//! - **`broker`**   – Ties the two together: dispatch, reply routing, and
//!   disconnect cleanup.
//! - **`settings`** – Runtime tunables (bind address, timeouts, line limit).

pub mod broker;
pub mod pending;
pub mod registry;
pub mod settings;
