//! Broker: the registry plus the command/reply correlation protocol.
//!
//! This is the piece of HomeLink with real concurrency concerns.  Every
//! connection handler holds an `Arc<Broker>`; the broker owns the only state
//! shared between handlers:
//!
//! - the [`DeviceRegistry`] (behind a `tokio::sync::Mutex`), and
//! - the [`PendingTable`] of forwarded commands awaiting a reply.
//!
//! # One command round trip
//!
//! ```text
//! controller handler                 Broker                     device handler
//! ──────────────────                 ──────                     ──────────────
//! dispatch_command("LAMPADA_1") ──►  lookup link
//!                                    wait for device turn (FIFO, ≤ queue_timeout)
//!                                    re-check link still current
//!                                    mint id #7, open pending #7
//!                                    outbox.send(COMANDO #7) ───► write to socket
//!                                    wait on #7 (≤ response_timeout)
//!                                                                 RESPOSTA #7 read
//!                                    accept_reply(#7) ◄──────────
//! ◄── Ok(CommandReply #7)
//! ```
//!
//! # Busy devices
//!
//! At most one command per device is outstanding.  A second controller
//! commanding the same device queues behind the first on the device's turn
//! lock.  If it cannot get its turn within `queue_timeout` it is answered
//! with `device_busy` and nothing is forwarded.

use std::sync::Arc;
use std::time::Duration;

use homelink_core::{CorrelationCounter, CorrelationId, Envelope, EnvelopeKind, ErrorCode};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::application::pending::{DeviceReply, PendingTable, Resolution, ResolveOutcome};
use crate::application::registry::{ConnectionId, DeviceLink, DeviceRegistry};
use crate::application::settings::BrokerSettings;

/// Why a command could not be answered by its device.
#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("device '{device}' is not registered")]
    DeviceNotFound { device: String },

    #[error("device '{device}' stayed busy for {waited:?}")]
    DeviceBusy { device: String, waited: Duration },

    #[error("device '{device}' did not answer within {waited:?}")]
    DeviceTimeout { device: String, waited: Duration },

    #[error("device '{device}' disconnected before answering")]
    DeviceDisconnected { device: String },
}

impl DispatchError {
    /// The wire code sent back to the controller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DeviceNotFound { .. } => ErrorCode::DeviceNotFound,
            Self::DeviceBusy { .. } => ErrorCode::DeviceBusy,
            Self::DeviceTimeout { .. } => ErrorCode::DeviceTimeout,
            Self::DeviceDisconnected { .. } => ErrorCode::DeviceDisconnected,
        }
    }
}

/// A device's answer, tagged with the correlation id it answered.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub correlation_id: CorrelationId,
    pub reply: DeviceReply,
}

/// What happened when a device connection closed.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectReport {
    /// `false` when the name had already been taken over by a newer
    /// connection.
    pub unregistered: bool,
    /// Commands that were waiting on this connection and were failed with
    /// `device_disconnected`.
    pub failed: Vec<CorrelationId>,
}

/// Shared broker state.  Wrap in an `Arc` and hand a clone to every handler.
#[derive(Debug)]
pub struct Broker {
    settings: BrokerSettings,
    registry: Mutex<DeviceRegistry>,
    pending: PendingTable,
    correlation: CorrelationCounter,
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            registry: Mutex::new(DeviceRegistry::new()),
            pending: PendingTable::new(),
            correlation: CorrelationCounter::new(),
        }
    }

    /// Convenience for `Arc::new(Broker::new(settings))`.
    pub fn shared(settings: BrokerSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    // ── Registry operations ──────────────────────────────────────────────────

    /// Installs `link` as the device called `name`, replacing any previous
    /// registration.  Returns the replaced connection id.
    pub async fn register_device(&self, name: &str, link: DeviceLink) -> Option<ConnectionId> {
        let connection_id = link.connection_id;
        let mut registry = self.registry.lock().await;
        let replaced = registry.register(name, link);
        match replaced {
            Some(old) if old != connection_id => warn!(
                "{name} re-registered by connection {connection_id}; connection {old} is no longer routable"
            ),
            _ => info!("{name} registered ({} device(s) online)", registry.len()),
        }
        replaced
    }

    /// Returns the routing link for `name`.
    pub async fn lookup_device(&self, name: &str) -> Option<DeviceLink> {
        self.registry.lock().await.lookup(name)
    }

    /// Removes `name` if it still belongs to `connection_id`.
    pub async fn unregister_device(&self, name: &str, connection_id: ConnectionId) -> bool {
        self.registry.lock().await.unregister(name, connection_id)
    }

    /// Sorted names of all registered devices.
    pub async fn device_names(&self) -> Vec<String> {
        self.registry.lock().await.device_names()
    }

    /// Number of commands currently awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    // ── Correlation protocol ─────────────────────────────────────────────────

    /// Forwards a command to `device` and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::DeviceNotFound`] immediately, with no state created,
    ///   when no device is registered under that name.
    /// - [`DispatchError::DeviceBusy`] when the device's turn did not come up
    ///   within `queue_timeout`.  If the device re-registers on a new
    ///   connection while the command is queued, the command follows it there
    ///   within the same budget.
    /// - [`DispatchError::DeviceTimeout`] when the reply did not arrive within
    ///   `response_timeout`; the pending entry is removed so a late reply is
    ///   dropped.
    /// - [`DispatchError::DeviceDisconnected`] when the device's connection
    ///   closed first.
    pub async fn dispatch_command(
        &self,
        device: &str,
        payload: Option<Value>,
    ) -> Result<CommandReply, DispatchError> {
        let deadline = Instant::now() + self.settings.queue_timeout;

        // Held until this function returns: one outstanding command per device.
        let (link, _turn) = loop {
            let link = self
                .lookup_device(device)
                .await
                .ok_or_else(|| DispatchError::DeviceNotFound {
                    device: device.to_string(),
                })?;

            let guard = match timeout_at(deadline, Arc::clone(&link.turn).lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("{device} busy for {:?}; rejecting command", self.settings.queue_timeout);
                    return Err(DispatchError::DeviceBusy {
                        device: device.to_string(),
                        waited: self.settings.queue_timeout,
                    });
                }
            };

            // The name may have moved to a new connection while we queued.
            match self.lookup_device(device).await {
                Some(current) if current.connection_id == link.connection_id => break (link, guard),
                Some(current) => debug!(
                    "{device} moved to connection {} while queued; retrying there",
                    current.connection_id
                ),
                None => {
                    return Err(DispatchError::DeviceNotFound {
                        device: device.to_string(),
                    })
                }
            }
        };

        let id = self.correlation.next();
        let mut rx = self.pending.open(id, device, link.connection_id).await;
        let command = Envelope {
            kind: EnvelopeKind::Command,
            device: Some(device.to_string()),
            payload,
            correlation_id: Some(id),
        };

        debug!("forwarding {id} to {device} on connection {}", link.connection_id);
        let waited = timeout(self.settings.response_timeout, async {
            if link.outbox.send(command).await.is_err() {
                return None;
            }
            (&mut rx).await.ok()
        })
        .await;

        let resolution = match waited {
            Ok(Some(resolution)) => resolution,
            Ok(None) => {
                // The device handler closed its outbox before taking the command.
                self.pending.cancel(id).await;
                rx.try_recv().unwrap_or(Resolution::Disconnected)
            }
            Err(_) => {
                if self.pending.cancel(id).await {
                    warn!(
                        "{id} to {device} timed out after {:?}",
                        self.settings.response_timeout
                    );
                    return Err(DispatchError::DeviceTimeout {
                        device: device.to_string(),
                        waited: self.settings.response_timeout,
                    });
                }
                // Lost the race: the outcome was delivered just as the timer fired.
                match rx.try_recv() {
                    Ok(resolution) => resolution,
                    Err(_) => {
                        return Err(DispatchError::DeviceTimeout {
                            device: device.to_string(),
                            waited: self.settings.response_timeout,
                        })
                    }
                }
            }
        };

        match resolution {
            Resolution::Reply(reply) => {
                info!("{id} answered by {device}");
                Ok(CommandReply {
                    correlation_id: id,
                    reply,
                })
            }
            Resolution::Disconnected => {
                warn!("{id} failed: {device} disconnected");
                Err(DispatchError::DeviceDisconnected {
                    device: device.to_string(),
                })
            }
        }
    }

    /// Routes a device's reply to the waiting controller.
    ///
    /// Unknown, already-resolved, and foreign ids are dropped.
    pub async fn accept_reply(
        &self,
        id: CorrelationId,
        from: ConnectionId,
        reply: DeviceReply,
    ) -> ResolveOutcome {
        let outcome = self.pending.resolve(id, from, reply).await;
        match outcome {
            ResolveOutcome::Delivered => {}
            ResolveOutcome::Unknown => {
                debug!("dropping reply {id} from {from}: no such pending command")
            }
            ResolveOutcome::WrongConnection => {
                warn!("dropping reply {id} from {from}: command was sent to another connection")
            }
        }
        outcome
    }

    /// Cleans up after a device connection closed.
    ///
    /// The caller must close the connection's outbox first so no new command
    /// can slip in after the pending entries have been failed.
    pub async fn device_disconnected(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> DisconnectReport {
        let unregistered = self.unregister_device(name, connection_id).await;
        let failed = self.pending.fail_connection(connection_id).await;
        if unregistered {
            info!("{name} removed from registry");
        } else {
            debug!("{name}: connection {connection_id} was already superseded");
        }
        if !failed.is_empty() {
            warn!(
                "{name} disconnected with {} command(s) outstanding; failing them",
                failed.len()
            );
        }
        DisconnectReport {
            unregistered,
            failed,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
