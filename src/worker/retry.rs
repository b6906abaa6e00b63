//! Reconnect schedule for servers that dropped out of the worker pool.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::ServerAddr;

/// Tracks dead servers and when each was last tried.
///
/// A server becomes due once `interval` has passed since its last attempt,
/// so each one is retried at most once per interval.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    interval: Duration,
    pending: BTreeMap<ServerAddr, Instant>,
}

impl RetrySchedule {
    /// Empty schedule retrying every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a failed attempt on `addr` at `now`.
    pub fn schedule(&mut self, addr: ServerAddr, now: Instant) {
        self.pending.insert(addr, now);
    }

    /// Servers whose next attempt is due at `now`.
    pub fn due(&self, now: Instant) -> Vec<ServerAddr> {
        self.pending
            .iter()
            .filter(|(_, last)| now >= **last + self.interval)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Forget `addr` after it reconnected.
    pub fn remove(&mut self, addr: &ServerAddr) -> bool {
        self.pending.remove(addr).is_some()
    }

    pub fn contains(&self, addr: &ServerAddr) -> bool {
        self.pending.contains_key(addr)
    }

    /// Forget every scheduled server.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
