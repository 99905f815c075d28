//! Correlation ids: the token that ties a device's reply to one request.
//!
//! # Why correlate? (for beginners)
//!
//! When the broker forwards a `COMANDO` to a lamp it later receives a
//! `RESPOSTA` from that lamp.  Knowing *which device* answered is not enough:
//! if an earlier request already timed out, a late reply to it must not be
//! mistaken for the answer to the next request.  The broker therefore stamps
//! every forwarded command with a fresh [`CorrelationId`] and the device echoes
//! it back unchanged.
//!
//! # Thread safety
//!
//! [`CorrelationCounter`] uses an `AtomicU64`, so every connection handler can
//! mint ids concurrently without taking a lock and without two handlers ever
//! receiving the same value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque token identifying one outstanding command.
///
/// On the wire it is a plain unsigned integer in the `correlacao` field.
/// Devices must treat it as opaque and echo it back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wraps a raw wire value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A thread-safe, monotonically increasing source of [`CorrelationId`]s.
///
/// Ids start at 1 and are unique until the `u64` range is exhausted.  At that
/// point the counter saturates and keeps returning `u64::MAX` rather than
/// wrapping back to ids already handed out.  Minting one id per nanosecond
/// would take roughly 584 years to get there.
///
/// # Examples
///
/// ```rust
/// use homelink_core::CorrelationCounter;
///
/// let counter = CorrelationCounter::new();
/// assert_eq!(counter.next().get(), 1);
/// assert_eq!(counter.next().get(), 2);
/// ```
#[derive(Debug)]
pub struct CorrelationCounter {
    inner: AtomicU64,
}

impl CorrelationCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id and atomically advances the counter.
    ///
    /// `Ordering::Relaxed` is sufficient: ids only need to be unique, they do
    /// not publish any other memory to the thread that reads them.
    pub fn next(&self) -> CorrelationId {
        let raw = self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        CorrelationId(raw)
    }
}

impl Default for CorrelationCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_starts_at_one() {
        // Arrange
        let counter = CorrelationCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, CorrelationId::new(1));
    }

    #[test]
    fn test_counter_is_strictly_increasing() {
        let counter = CorrelationCounter::new();

        let values: Vec<CorrelationId> = (0..100).map(|_| counter.next()).collect();

        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must be strictly increasing");
        }
    }

    #[test]
    fn test_counter_ids_are_unique_across_threads() {
        // Arrange
        let counter = Arc::new(CorrelationCounter::new());
        let thread_count = 8;
        let ids_per_thread = 1000;

        // Act – mint from many threads simultaneously
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..ids_per_thread).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<CorrelationId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert – no two handlers ever received the same id
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), thread_count * ids_per_thread);
    }

    #[test]
    fn test_counter_saturates_instead_of_wrapping() {
        // Arrange – one step before the end of the range
        let counter = CorrelationCounter {
            inner: AtomicU64::new(u64::MAX - 1),
        };

        // Act
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();

        // Assert – never wraps back to a previously issued small id; once
        // exhausted the counter stays at the top of the range
        assert_eq!(a.get(), u64::MAX - 1);
        assert_eq!(b.get(), u64::MAX);
        assert_eq!(c.get(), u64::MAX);
    }

    #[test]
    fn test_correlation_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&CorrelationId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_correlation_id_display_has_hash_prefix() {
        assert_eq!(CorrelationId::new(7).to_string(), "#7");
    }
}
