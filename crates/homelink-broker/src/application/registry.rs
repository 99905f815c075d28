//! DeviceRegistry: which connection currently *is* the device named X.
//!
//! The registry is the broker's in-memory directory of online devices.  Each
//! entry maps a device name to a [`DeviceLink`]: a routing reference to the
//! connection handler that owns that device's socket.
//!
//! # Ownership (for beginners)
//!
//! The registry never owns a socket and never performs I/O.  A `DeviceLink`
//! only holds the *sending* end of the device handler's outbox channel.  To
//! forward a command, a controller handler clones the link out of the
//! registry, releases the registry lock, and pushes the envelope into the
//! outbox; the device's own handler writes it to the socket.
//!
//! # Replacement rule
//!
//! Names are unique.  Registering a name that is already taken replaces the
//! entry; the previous connection stays open but becomes unroutable.  Because
//! of that, [`DeviceRegistry::unregister`] removes an entry only when it still
//! belongs to the connection asking for removal.  Without the check, an old
//! connection closing late would delete its replacement.

use std::collections::HashMap;
use std::sync::Arc;

use homelink_core::Envelope;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Identity of one accepted TCP connection.
pub type ConnectionId = Uuid;

/// Routing reference to a registered device's connection handler.
///
/// Cheap to clone: every field is a handle.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    /// The connection this link routes to.
    pub connection_id: ConnectionId,
    /// Outbox of the device's connection handler.  Sends fail once that
    /// handler has closed.
    pub outbox: mpsc::Sender<Envelope>,
    /// Per-device turn lock.  Held by a controller handler for the whole
    /// forward-and-wait of one command so at most one command per device is
    /// outstanding; `tokio::sync::Mutex` hands the lock out in FIFO order.
    pub turn: Arc<Mutex<()>>,
}

impl DeviceLink {
    /// Creates a link for a freshly registered connection.
    pub fn new(connection_id: ConnectionId, outbox: mpsc::Sender<Envelope>) -> Self {
        Self {
            connection_id,
            outbox,
            turn: Arc::new(Mutex::new(())),
        }
    }
}

/// In-memory directory of online devices, keyed by device name.
///
/// Not synchronised on its own; the [`Broker`](super::broker::Broker) keeps it
/// behind a `tokio::sync::Mutex` so every mutation happens under exclusive
/// access.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceLink>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `link` under `name`, replacing any previous entry.
    ///
    /// Returns the connection id of the replaced entry, if there was one.
    pub fn register(&mut self, name: &str, link: DeviceLink) -> Option<ConnectionId> {
        self.devices
            .insert(name.to_string(), link)
            .map(|previous| previous.connection_id)
    }

    /// Returns a clone of the link registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<DeviceLink> {
        self.devices.get(name).cloned()
    }

    /// Removes `name` only if it is still registered to `connection_id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&mut self, name: &str, connection_id: ConnectionId) -> bool {
        match self.devices.get(name) {
            Some(link) if link.connection_id == connection_id => {
                self.devices.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Sorted snapshot of registered names, for logs and diagnostics.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// `true` when no device is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
