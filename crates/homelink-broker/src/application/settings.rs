//! Broker runtime settings.
//!
//! [`BrokerSettings`] is the single source of truth for every tunable the
//! broker uses at runtime.  It is a plain struct with no I/O: `main.rs`
//! builds it from the TOML file and CLI flags, tests build it directly.

use std::net::SocketAddr;
use std::time::Duration;

use homelink_core::DEFAULT_MAX_LINE_BYTES;

/// Default TCP address the broker listens on.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

/// Default bound on waiting for a device's reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for a busy device's turn.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// All runtime configuration for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    /// Address and port the listener binds to.
    pub bind_addr: SocketAddr,

    /// How long a controller waits for the device's `RESPOSTA` after the
    /// command has been forwarded.  Expiry answers `device_timeout`.
    pub response_timeout: Duration,

    /// How long a controller waits for its turn while another controller's
    /// command to the same device is outstanding.  Expiry answers
    /// `device_busy`.
    pub queue_timeout: Duration,

    /// Longest accepted inbound line in bytes.
    pub max_line_bytes: usize,
}

impl Default for BrokerSettings {
    /// | Field            | Default          |
    /// |------------------|------------------|
    /// | bind_addr        | `127.0.0.1:5000` |
    /// | response_timeout | 10 seconds       |
    /// | queue_timeout    | 10 seconds       |
    /// | max_line_bytes   | 64 KiB           |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_addr_matches_documented_constant() {
        let cfg = BrokerSettings::default();
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_default_timeouts_are_ten_seconds() {
        let cfg = BrokerSettings::default();
        assert_eq!(cfg.response_timeout, Duration::from_secs(10));
        assert_eq!(cfg.queue_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_default_line_limit_is_core_default() {
        assert_eq!(BrokerSettings::default().max_line_bytes, 64 * 1024);
    }
}
