//! Per-connection handler: role classification and the read loops.
//!
//! One handler runs in its own Tokio task for every accepted socket.  It is
//! the only code that ever touches that socket.
//!
//! # State machine
//!
//! ```text
//!                  REGISTRO ──► DeviceMode ─────┐
//! Unclassified ──┤                              ├──► Closed
//!                  other    ──► ControllerMode ─┘
//! ```
//!
//! A malformed line while unclassified is answered with `malformed_envelope`
//! and the connection stays unclassified.
//!
//! In **DeviceMode** the handler multiplexes two sources with
//! `tokio::select!`: envelopes read from the socket (replies, pings) and
//! commands pushed into its outbox by controller handlers.  Both are handled
//! by this one task, so writes to the device socket never interleave.
//!
//! In **ControllerMode** each `COMANDO` is dispatched and awaited before the
//! next line is read, so a controller has at most one command in flight.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use homelink_core::{Connection, Envelope, EnvelopeKind, ErrorCode, TransportError};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::broker::{Broker, DispatchError};
use crate::application::pending::{DeviceReply, ReplyKind};
use crate::application::registry::{ConnectionId, DeviceLink};

/// Commands a device connection can have queued before forwarders wait.
///
/// The per-device turn lock already limits this to one in practice.
const DEVICE_OUTBOX_CAPACITY: usize = 8;

/// Payload of the acknowledgment sent back for a `REGISTRO`.
pub const REGISTER_ACK: &str = "REGISTRADO";

/// Role of a connection, decided by its first well-formed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Unclassified,
    Device { name: String },
    Controller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unclassified => f.write_str("unclassified"),
            Role::Device { name } => write!(f, "device {name}"),
            Role::Controller => f.write_str("controller"),
        }
    }
}

enum DeviceEvent {
    Inbound(Option<Result<Envelope, TransportError>>),
    Outbound(Envelope),
}

/// Drives one accepted connection from first byte to close.
pub struct ConnectionHandler<S = TcpStream> {
    id: ConnectionId,
    peer: SocketAddr,
    broker: Arc<Broker>,
    conn: Connection<S>,
    role: Role,
}

/// Task entry point used by the listener: runs the handler and logs how the
/// connection ended.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: Arc<Broker>) {
    let mut handler = ConnectionHandler::new(stream, peer, broker);
    match handler.run().await {
        Ok(()) => info!("{peer} ({}) closed", handler.role()),
        Err(e) => warn!("{peer} ({}) closed with error: {e}", handler.role()),
    }
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, broker: Arc<Broker>) -> Self {
        let max_line_bytes = broker.settings().max_line_bytes;
        Self {
            id: Uuid::new_v4(),
            peer,
            broker,
            conn: Connection::with_max_line_bytes(stream, max_line_bytes),
            role: Role::Unclassified,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Runs the connection until the peer closes it or the socket fails.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`TransportError`] (I/O failure, invalid UTF-8).
    /// Device cleanup has already happened when this returns.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        let first = loop {
            match self.conn.recv().await {
                None => return Ok(()),
                Some(Ok(envelope)) => break envelope,
                Some(Err(e)) => self.on_read_error(e).await?,
            }
        };

        match (first.kind, first.device.clone()) {
            (EnvelopeKind::Register, Some(name)) => self.run_device(name).await,
            _ => {
                self.role = Role::Controller;
                info!("{} classified as controller", self.peer);
                self.on_controller_envelope(first).await?;
                self.run_controller().await
            }
        }
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    /// Answers a recoverable read error and keeps going; returns terminal
    /// errors to the caller.
    async fn on_read_error(&mut self, error: TransportError) -> Result<(), TransportError> {
        if !error.is_recoverable() {
            return Err(error);
        }
        warn!("{} ({}): {error}", self.peer, self.role);
        self.send_error(None, ErrorCode::MalformedEnvelope).await
    }

    async fn send_error(
        &mut self,
        device: Option<String>,
        code: ErrorCode,
    ) -> Result<(), TransportError> {
        self.conn.send(&Envelope::error(device, code)).await
    }

    async fn reject_unexpected(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        warn!(
            "{} ({}): unexpected {} for {}",
            self.peer,
            self.role,
            envelope.kind,
            envelope.device_or_dash()
        );
        self.send_error(envelope.device.clone(), ErrorCode::UnexpectedMessage)
            .await
    }

    // ── Device mode ──────────────────────────────────────────────────────────

    async fn run_device(&mut self, name: String) -> Result<(), TransportError> {
        let (outbox_tx, mut outbox_rx) = mpsc::channel(DEVICE_OUTBOX_CAPACITY);
        let link = DeviceLink::new(self.id, outbox_tx);
        self.role = Role::Device { name: name.clone() };
        self.broker.register_device(&name, link.clone()).await;

        let result = self.device_loop(&name, &link, &mut outbox_rx).await;

        // Close before unregistering so no forward can land after cleanup.
        outbox_rx.close();
        drop(link);
        let report = self.broker.device_disconnected(&name, self.id).await;
        debug!(
            "{name} cleanup: unregistered={}, failed={}",
            report.unregistered,
            report.failed.len()
        );
        result
    }

    async fn device_loop(
        &mut self,
        name: &str,
        link: &DeviceLink,
        outbox_rx: &mut mpsc::Receiver<Envelope>,
    ) -> Result<(), TransportError> {
        self.send_register_ack(name).await?;

        loop {
            let event = tokio::select! {
                inbound = self.conn.recv() => DeviceEvent::Inbound(inbound),
                Some(command) = outbox_rx.recv() => DeviceEvent::Outbound(command),
            };

            match event {
                DeviceEvent::Inbound(None) => return Ok(()),
                DeviceEvent::Inbound(Some(Ok(envelope))) => {
                    self.on_device_envelope(name, link, envelope).await?
                }
                DeviceEvent::Inbound(Some(Err(e))) => self.on_read_error(e).await?,
                DeviceEvent::Outbound(command) => {
                    debug!("→ {name}: {:?}", command.payload);
                    self.conn.send(&command).await?;
                }
            }
        }
    }

    async fn send_register_ack(&mut self, name: &str) -> Result<(), TransportError> {
        let ack = Envelope::register(name, Some(Value::from(REGISTER_ACK)));
        self.conn.send(&ack).await
    }

    async fn on_device_envelope(
        &mut self,
        name: &str,
        link: &DeviceLink,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        match (envelope.kind, envelope.correlation_id) {
            (EnvelopeKind::Response, Some(id)) | (EnvelopeKind::Error, Some(id)) => {
                let kind = if envelope.kind == EnvelopeKind::Response {
                    ReplyKind::Response
                } else {
                    ReplyKind::Error
                };
                let reply = DeviceReply {
                    kind,
                    payload: envelope.payload,
                };
                self.broker.accept_reply(id, self.id, reply).await;
                Ok(())
            }
            (EnvelopeKind::Error, None) => {
                warn!("{name} reported an error: {:?}", envelope.payload);
                Ok(())
            }
            (EnvelopeKind::Ping, _) => {
                debug!("PING from {name}");
                Ok(())
            }
            (EnvelopeKind::Register, _) if envelope.device.as_deref() == Some(name) => {
                info!("{name} re-registered on the same connection");
                self.broker.register_device(name, link.clone()).await;
                self.send_register_ack(name).await
            }
            _ => self.reject_unexpected(&envelope).await,
        }
    }

    // ── Controller mode ──────────────────────────────────────────────────────

    async fn run_controller(&mut self) -> Result<(), TransportError> {
        while let Some(inbound) = self.conn.recv().await {
            match inbound {
                Ok(envelope) => self.on_controller_envelope(envelope).await?,
                Err(e) => self.on_read_error(e).await?,
            }
        }
        Ok(())
    }

    async fn on_controller_envelope(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        match envelope.kind {
            EnvelopeKind::Command => {
                let device = envelope.device.unwrap_or_default();
                let reply = self.forward_command(device, envelope.payload).await;
                self.conn.send(&reply).await
            }
            EnvelopeKind::Ping => {
                debug!("PING from controller {}", self.peer);
                Ok(())
            }
            EnvelopeKind::Error => {
                info!("controller {} sent error: {:?}", self.peer, envelope.payload);
                Ok(())
            }
            EnvelopeKind::Register | EnvelopeKind::Response => {
                self.reject_unexpected(&envelope).await
            }
        }
    }

    /// Dispatches one command and builds the envelope to send back.
    async fn forward_command(&self, device: String, payload: Option<Value>) -> Envelope {
        info!("{} → {device}: {:?}", self.peer, payload);
        match self.broker.dispatch_command(&device, payload).await {
            Ok(answer) => {
                let kind = match answer.reply.kind {
                    ReplyKind::Response => EnvelopeKind::Response,
                    ReplyKind::Error => EnvelopeKind::Error,
                };
                Envelope {
                    kind,
                    device: Some(device),
                    payload: answer.reply.payload,
                    correlation_id: Some(answer.correlation_id),
                }
            }
            Err(e) => {
                if !matches!(e, DispatchError::DeviceNotFound { .. }) {
                    warn!("{}: {e}", self.peer);
                }
                Envelope::error(Some(device), e.code())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
