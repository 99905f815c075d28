//! Broker listener: binds the TCP port and spawns one handler per connection.
//!
//! The accept loop never does protocol work itself.  Each accepted socket is
//! handed to [`handle_connection`] in a fresh Tokio task, so a slow or
//! misbehaving peer only ever stalls its own task.
//!
//! Shutdown is cooperative: `accept()` is polled with a 200 ms timeout and the
//! shared `running` flag is checked between attempts.  Connections that are
//! already open are left to finish on their own.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::application::broker::Broker;
use crate::infrastructure::network::handler::handle_connection;

/// How often the accept loop wakes up to check the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors raised while setting up the listener.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The address is in use or not permitted.
    #[error("failed to bind broker listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The bound socket could not report its local address.
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Binds the broker's TCP listener.
///
/// Bind to port 0 to let the OS choose a free port (used by tests); read the
/// result back with `TcpListener::local_addr`.
///
/// # Errors
///
/// Returns [`NetworkError::BindFailed`] if the socket cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::BindFailed { addr, source })?;
    let local = listener.local_addr().map_err(NetworkError::LocalAddr)?;
    info!("broker listening on {local}");
    Ok(listener)
}

/// Decrements the active-connection count when a handler task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let remaining = self.0.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!("{remaining} connection(s) active");
    }
}

/// Runs the accept loop until `running` is cleared.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>, running: Arc<AtomicBool>) {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; no longer accepting connections");
            break;
        }

        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("{peer}: could not disable Nagle: {e}");
                }
                let count = active.fetch_add(1, Ordering::Relaxed) + 1;
                info!("accepted {peer} ({count} connection(s) active)");

                let guard = ActiveGuard(Arc::clone(&active));
                let broker = Arc::clone(&broker);
                tokio::spawn(async move {
                    let _guard = guard;
                    handle_connection(stream, peer, broker).await;
                });
            }
            // Transient (e.g. out of file descriptors); keep serving.
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::settings::BrokerSettings;

    #[tokio::test]
    async fn test_bind_port_zero_picks_free_port() {
        let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_in_use_port_reports_address() {
        // Arrange
        let first = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let taken = first.local_addr().unwrap();

        // Act
        let err = bind(taken).await.unwrap_err();

        // Assert
        assert!(matches!(err, NetworkError::BindFailed { addr, .. } if addr == taken));
        assert!(err.to_string().contains(&taken.to_string()));
    }

    #[tokio::test]
    async fn test_serve_returns_once_running_is_cleared() {
        // Arrange
        let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let broker = Broker::shared(BrokerSettings::default());
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(serve(listener, broker, Arc::clone(&running)));

        // Act
        running.store(false, Ordering::Relaxed);

        // Assert
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop must notice the flag within one poll interval")
            .unwrap();
    }
}
