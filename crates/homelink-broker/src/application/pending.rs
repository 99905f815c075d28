//! PendingTable: commands that have been forwarded and await a device reply.
//!
//! Every forwarded `COMANDO` gets an entry keyed by its [`CorrelationId`].  The
//! entry holds the sending half of a `tokio::sync::oneshot` channel; the
//! controller handler that forwarded the command waits on the receiving half.
//!
//! # Exactly-once resolution
//!
//! An entry can end in three ways:
//!
//! ```text
//!            ┌── resolve()          device replied          → Reply
//! open() ────┼── cancel()           controller timed out    → (nothing sent)
//!            └── fail_connection()  device socket closed    → Disconnected
//! ```
//!
//! All three *remove* the entry under the table lock, and the outcome is sent
//! into the oneshot while the lock is still held.  Whichever call removes the
//! entry first decides the outcome; the others find nothing and do nothing.
//! So when `cancel()` returns `false`, the waiter knows another outcome is
//! already sitting in its receiver.

use std::collections::HashMap;
use std::time::Instant;

use homelink_core::CorrelationId;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::application::registry::ConnectionId;

/// How the device answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `RESPOSTA`
    Response,
    /// `ERRO` carrying the correlation id (device-side failure).
    Error,
}

/// A device's answer to one forwarded command.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReply {
    pub kind: ReplyKind,
    pub payload: Option<Value>,
}

/// What the waiting controller handler receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The device answered.
    Reply(DeviceReply),
    /// The device's connection closed before it answered.
    Disconnected,
}

/// Result of [`PendingTable::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The reply was handed to the waiting controller.
    Delivered,
    /// No entry: the id is unknown, already resolved, or timed out.
    Unknown,
    /// The entry exists but was forwarded to a different connection.  The
    /// entry is left untouched.
    WrongConnection,
}

#[derive(Debug)]
struct PendingRequest {
    device: String,
    connection_id: ConnectionId,
    slot: oneshot::Sender<Resolution>,
    opened_at: Instant,
}

/// Table of forwarded commands awaiting a reply.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a rendezvous for `id`, answerable only by `connection_id`.
    ///
    /// Must be called *before* the command is pushed to the device's outbox:
    /// a device that closes right after accepting the command then always
    /// finds the entry in [`fail_connection`](Self::fail_connection).
    pub async fn open(
        &self,
        id: CorrelationId,
        device: &str,
        connection_id: ConnectionId,
    ) -> oneshot::Receiver<Resolution> {
        let (slot, rx) = oneshot::channel();
        self.entries.lock().await.insert(
            id,
            PendingRequest {
                device: device.to_string(),
                connection_id,
                slot,
                opened_at: Instant::now(),
            },
        );
        rx
    }

    /// Delivers `reply` for `id` if the entry exists and belongs to `from`.
    pub async fn resolve(
        &self,
        id: CorrelationId,
        from: ConnectionId,
        reply: DeviceReply,
    ) -> ResolveOutcome {
        let mut entries = self.entries.lock().await;

        match entries.get(&id) {
            None => return ResolveOutcome::Unknown,
            Some(entry) if entry.connection_id != from => return ResolveOutcome::WrongConnection,
            Some(_) => {}
        }

        let Some(entry) = entries.remove(&id) else {
            return ResolveOutcome::Unknown;
        };
        debug!(
            "{id} for {} answered after {:?}",
            entry.device,
            entry.opened_at.elapsed()
        );
        // The waiter may already be gone (controller socket died mid-wait);
        // the entry is resolved either way.
        let _ = entry.slot.send(Resolution::Reply(reply));
        ResolveOutcome::Delivered
    }

    /// Removes `id` without delivering anything.
    ///
    /// Returns `false` if the entry was already resolved or failed, in which
    /// case the outcome is already in the waiter's receiver.
    pub async fn cancel(&self, id: CorrelationId) -> bool {
        self.entries.lock().await.remove(&id).is_some()
    }

    /// Fails every entry forwarded to `connection_id` with
    /// [`Resolution::Disconnected`] and returns their ids.
    pub async fn fail_connection(&self, connection_id: ConnectionId) -> Vec<CorrelationId> {
        let mut entries = self.entries.lock().await;

        let doomed: Vec<CorrelationId> = entries
            .iter()
            .filter(|(_, entry)| entry.connection_id == connection_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            if let Some(entry) = entries.remove(id) {
                let _ = entry.slot.send(Resolution::Disconnected);
            }
        }
        doomed
    }

    /// Number of outstanding entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// `true` when nothing is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
