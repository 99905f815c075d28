//! Controller-side connection to the broker.
//!
//! The broker serves one command per controller connection at a time and
//! answers each with exactly one envelope, so replies arrive in the order the
//! commands were sent.  If the panel gives up waiting locally, the reply for
//! that command still arrives later; [`PanelClient`] counts those and
//! discards them before reading the reply to the next command.

use std::net::SocketAddr;
use std::time::Duration;

use homelink_core::{Connection, Envelope, TransportError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Errors the panel can hit while talking to the broker.
#[derive(Debug, Error)]
pub enum PanelError {
    /// TCP connection to the broker failed.
    #[error("failed to connect to broker at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reply within the panel's own deadline.
    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    /// The broker closed the connection.
    #[error("connection closed by broker")]
    Closed,
}

/// A control panel's connection to the broker.
pub struct PanelClient<S = TcpStream> {
    conn: Connection<S>,
    reply_timeout: Duration,
    /// Replies still owed for commands the panel stopped waiting on.
    stale_replies: usize,
}

impl PanelClient<TcpStream> {
    /// Connects to the broker at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PanelError::ConnectFailed`] if the TCP handshake fails.
    pub async fn connect(addr: SocketAddr, reply_timeout: Duration) -> Result<Self, PanelError> {
        let conn = Connection::connect(addr)
            .await
            .map_err(|source| PanelError::ConnectFailed { addr, source })?;
        Ok(Self::new(conn, reply_timeout))
    }
}

impl<S> PanelClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: Connection<S>, reply_timeout: Duration) -> Self {
        Self {
            conn,
            reply_timeout,
            stale_replies: 0,
        }
    }

    /// Sends `command` to `device` and returns the broker's reply: a
    /// `RESPOSTA` from the device or an `ERRO`.
    ///
    /// # Errors
    ///
    /// [`PanelError::ReplyTimeout`] if nothing arrives within the reply
    /// timeout; the client stays usable.  [`PanelError::Closed`] or
    /// [`PanelError::Transport`] if the connection is gone.
    pub async fn send_command(&mut self, device: &str, command: &str) -> Result<Envelope, PanelError> {
        self.conn.send(&Envelope::command(device, command)).await?;
        debug!("sent {command} to {device}");

        let limit = self.reply_timeout;
        match timeout(limit, self.next_fresh_reply()).await {
            Ok(result) => result,
            Err(_) => {
                self.stale_replies += 1;
                Err(PanelError::ReplyTimeout(limit))
            }
        }
    }

    async fn next_fresh_reply(&mut self) -> Result<Envelope, PanelError> {
        loop {
            let reply = match self.conn.recv().await {
                None => return Err(PanelError::Closed),
                Some(Err(e)) if e.is_recoverable() => {
                    warn!("skipping unreadable reply: {e}");
                    continue;
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(reply)) => reply,
            };
            if self.stale_replies > 0 {
                self.stale_replies -= 1;
                debug!("discarding late reply {:?}", reply.correlation_id);
                continue;
            }
            return Ok(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelink_core::{CorrelationId, EnvelopeKind, ErrorCode};
    use tokio::io::{duplex, DuplexStream};

    fn client_and_broker(reply_timeout: Duration) -> (PanelClient<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = duplex(4096);
        (
            PanelClient::new(Connection::new(a), reply_timeout),
            Connection::new(b),
        )
    }

    async fn next(conn: &mut Connection<DuplexStream>) -> Envelope {
        conn.recv().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_send_command_returns_reply() {
        // Arrange
        let (mut client, mut broker) = client_and_broker(Duration::from_secs(5));
        let fake_broker = tokio::spawn(async move {
            let cmd = next(&mut broker).await;
            broker
                .send(&Envelope::response("LAMPADA_1", "LIGADA").with_correlation(CorrelationId::new(1)))
                .await
                .unwrap();
            cmd
        });

        // Act
        let reply = client.send_command("LAMPADA_1", "LIGAR").await.unwrap();

        // Assert
        let cmd = fake_broker.await.unwrap();
        assert_eq!(cmd.kind, EnvelopeKind::Command);
        assert_eq!(cmd.payload_str(), Some("LIGAR"));
        assert_eq!(reply.payload_str(), Some("LIGADA"));
    }

    #[tokio::test]
    async fn test_error_reply_is_returned_as_envelope() {
        let (mut client, mut broker) = client_and_broker(Duration::from_secs(5));
        tokio::spawn(async move {
            let _ = next(&mut broker).await;
            broker
                .send(&Envelope::error(Some("LAMPADA_9".into()), ErrorCode::DeviceNotFound))
                .await
                .unwrap();
            broker
        });

        let reply = client.send_command("LAMPADA_9", "STATUS").await.unwrap();

        assert_eq!(reply.error_code(), Some(ErrorCode::DeviceNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_discarded_after_local_timeout() {
        // Arrange
        let (mut client, mut broker) = client_and_broker(Duration::from_secs(2));

        // Act: first command times out locally
        let first = client.send_command("LAMPADA_1", "STATUS").await;
        let _ = next(&mut broker).await;

        // The broker then answers both commands in order
        let second = tokio::spawn(async move {
            let result = client.send_command("LAMPADA_1", "LIGAR").await;
            (client, result)
        });
        let _ = next(&mut broker).await;
        broker
            .send(&Envelope::response("LAMPADA_1", "DESLIGADA").with_correlation(CorrelationId::new(1)))
            .await
            .unwrap();
        broker
            .send(&Envelope::response("LAMPADA_1", "LIGADA").with_correlation(CorrelationId::new(2)))
            .await
            .unwrap();
        let (_client, second) = second.await.unwrap();

        // Assert
        assert!(matches!(first, Err(PanelError::ReplyTimeout(_))));
        assert_eq!(second.unwrap().payload_str(), Some("LIGADA"));
    }

    #[tokio::test]
    async fn test_closed_broker_is_reported() {
        let (mut client, broker) = client_and_broker(Duration::from_secs(5));
        drop(broker);

        let result = client.send_command("LAMPADA_1", "LIGAR").await;

        assert!(matches!(
            result,
            Err(PanelError::Closed) | Err(PanelError::Transport(_))
        ));
    }
}
