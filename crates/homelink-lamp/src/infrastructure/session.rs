//! Lamp ↔ broker session and the reconnect loop around it.
//!
//! A session is one TCP connection:
//!
//! 1. send `REGISTRO` and wait for the broker's acknowledgment,
//! 2. answer every `COMANDO` with a `RESPOSTA` echoing its correlation id,
//! 3. send a `PING` every heartbeat interval,
//!
//! until the broker closes the socket.  [`run_lamp`] then waits
//! `reconnect_interval` and starts a new session.  The lamp's on/off state
//! survives reconnects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use homelink_core::{Connection, Envelope, EnvelopeKind, TransportError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::lamp::Lamp;

/// Errors that end one lamp session.
#[derive(Debug, Error)]
pub enum LampError {
    /// TCP connection to the broker failed.
    #[error("failed to connect to broker at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket failed or carried invalid data.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The broker answered the registration with an error.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// The broker did not acknowledge the registration in time.
    #[error("no registration acknowledgment within {0:?}")]
    RegistrationTimeout(Duration),

    /// The broker closed the connection.
    #[error("connection closed by broker")]
    Closed,
}

/// Connection settings for a lamp.
#[derive(Debug, Clone)]
pub struct LampConfig {
    pub broker_addr: SocketAddr,
    /// Interval between `PING`s while connected.
    pub heartbeat_interval: Duration,
    /// Wait before reconnecting after the session ends.
    pub reconnect_interval: Duration,
    /// Bound on waiting for the registration acknowledgment.
    pub register_timeout: Duration,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            broker_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(5),
            register_timeout: Duration::from_secs(10),
        }
    }
}

/// Registers `lamp` on `conn` and waits for the acknowledgment.
///
/// Commands that arrive before the acknowledgment cannot exist (the broker
/// only routes to registered names), so anything other than the ack or an
/// error is skipped.
async fn register<S>(
    lamp: &Lamp,
    conn: &mut Connection<S>,
    limit: Duration,
) -> Result<(), LampError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(&lamp.registration()).await?;

    let wait_ack = async {
        loop {
            match conn.recv().await {
                None => return Err(LampError::Closed),
                Some(Err(e)) if e.is_recoverable() => warn!("{}: {e}", lamp.name()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(env)) if env.kind == EnvelopeKind::Register => return Ok(()),
                Some(Ok(env)) if env.kind == EnvelopeKind::Error => {
                    let reason = env
                        .payload
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "unknown".into());
                    return Err(LampError::RegistrationRejected(reason));
                }
                Some(Ok(env)) => debug!("{}: ignoring {} before ack", lamp.name(), env.kind),
            }
        }
    };

    time::timeout(limit, wait_ack)
        .await
        .map_err(|_| LampError::RegistrationTimeout(limit))?
}

/// Runs one session over an established connection.
///
/// Returns `Err(LampError::Closed)` when the broker hangs up; that is the
/// normal end of a session.
pub async fn run_session<S>(
    lamp: &mut Lamp,
    conn: &mut Connection<S>,
    config: &LampConfig,
) -> Result<(), LampError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    register(lamp, conn, config.register_timeout).await?;
    info!("{} registered; waiting for commands", lamp.name());

    let mut heartbeat = time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                conn.send(&Envelope::ping(Some(lamp.name().to_string()))).await?;
                debug!("{}: PING", lamp.name());
            }
            inbound = conn.recv() => match inbound {
                None => return Err(LampError::Closed),
                Some(Err(e)) if e.is_recoverable() => warn!("{}: {e}", lamp.name()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(env)) => {
                    if env.kind == EnvelopeKind::Error {
                        warn!("{}: broker reported {:?}", lamp.name(), env.payload);
                    }
                    if let Some(reply) = lamp.handle(&env) {
                        info!(
                            "{} {:?} → {} ({})",
                            lamp.name(),
                            env.payload,
                            lamp.state(),
                            reply.correlation_id.map(|id| id.to_string()).unwrap_or_default()
                        );
                        conn.send(&reply).await?;
                    }
                }
            },
        }
    }
}

/// Keeps `lamp` connected to the broker until `running` is cleared.
pub async fn run_lamp(mut lamp: Lamp, config: LampConfig, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match Connection::connect(config.broker_addr).await {
            Ok(mut conn) => {
                info!("{} connected to {}", lamp.name(), config.broker_addr);
                match run_session(&mut lamp, &mut conn, &config).await {
                    Err(LampError::Closed) => info!("{}: broker closed the connection", lamp.name()),
                    Err(e) => warn!("{}: session ended: {e}", lamp.name()),
                    Ok(()) => {}
                }
            }
            Err(source) => {
                let e = LampError::ConnectFailed {
                    addr: config.broker_addr,
                    source,
                };
                warn!("{}: {e}", lamp.name());
            }
        }

        if running.load(Ordering::Relaxed) {
            debug!(
                "{}: reconnecting in {:?}",
                lamp.name(),
                config.reconnect_interval
            );
            time::sleep(config.reconnect_interval).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use homelink_core::{CorrelationId, ErrorCode};
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream};

    fn config() -> LampConfig {
        LampConfig {
            heartbeat_interval: Duration::from_secs(30),
            register_timeout: Duration::from_secs(5),
            ..LampConfig::default()
        }
    }

    fn pipe() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = duplex(4096);
        (Connection::new(a), Connection::new(b))
    }

    async fn next(conn: &mut Connection<DuplexStream>) -> Envelope {
        conn.recv().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_session_registers_then_answers_command() {
        // Arrange
        let (mut lamp_side, mut broker) = pipe();
        let task = tokio::spawn(async move {
            let mut lamp = Lamp::new("LAMPADA_1");
            let result = run_session(&mut lamp, &mut lamp_side, &config()).await;
            (lamp, result)
        });

        // Act
        let reg = next(&mut broker).await;
        broker
            .send(&Envelope::register("LAMPADA_1", Some(json!("REGISTRADO"))))
            .await
            .unwrap();
        broker
            .send(&Envelope::command("LAMPADA_1", "LIGAR").with_correlation(CorrelationId::new(7)))
            .await
            .unwrap();
        let reply = next(&mut broker).await;
        drop(broker);
        let (lamp, result) = task.await.unwrap();

        // Assert
        assert_eq!(reg.kind, EnvelopeKind::Register);
        assert_eq!(reply.payload_str(), Some("LIGADA"));
        assert_eq!(reply.correlation_id, Some(CorrelationId::new(7)));
        assert!(matches!(result, Err(LampError::Closed)));
        assert_eq!(lamp.state(), crate::application::lamp::LampState::On);
    }

    #[tokio::test]
    async fn test_registration_error_is_reported() {
        let (mut lamp_side, mut broker) = pipe();
        let task = tokio::spawn(async move {
            let mut lamp = Lamp::new("LAMPADA_1");
            run_session(&mut lamp, &mut lamp_side, &config()).await
        });

        let _reg = next(&mut broker).await;
        broker
            .send(&Envelope::error(None, ErrorCode::MalformedEnvelope))
            .await
            .unwrap();

        assert!(matches!(
            task.await.unwrap(),
            Err(LampError::RegistrationRejected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_times_out() {
        // Arrange: the "broker" reads but never answers
        let (mut lamp_side, _broker) = pipe();
        let mut lamp = Lamp::new("LAMPADA_1");

        // Act
        let result = run_session(&mut lamp, &mut lamp_side, &config()).await;

        // Assert
        assert!(matches!(result, Err(LampError::RegistrationTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_ping_after_interval() {
        // Arrange
        let (mut lamp_side, mut broker) = pipe();
        tokio::spawn(async move {
            let mut lamp = Lamp::new("LAMPADA_2");
            run_session(&mut lamp, &mut lamp_side, &config()).await
        });
        let _reg = next(&mut broker).await;
        broker
            .send(&Envelope::register("LAMPADA_2", Some(json!("REGISTRADO"))))
            .await
            .unwrap();

        // Act: the paused clock jumps to the first heartbeat
        let ping = next(&mut broker).await;

        // Assert
        assert_eq!(ping.kind, EnvelopeKind::Ping);
        assert_eq!(ping.device.as_deref(), Some("LAMPADA_2"));
    }

    #[test]
    fn test_default_config_points_at_local_broker() {
        let cfg = LampConfig::default();
        assert_eq!(cfg.broker_addr.to_string(), "127.0.0.1:5000");
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
    }
}
