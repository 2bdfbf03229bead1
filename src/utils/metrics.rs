//! Observability and Metrics
//!
//! Counters describing the life of a broker or client: connections,
//! handshakes, traffic, and the failures that were isolated along the way.
//!
//! Each `Broker` and `ReconnectingClient` owns one `Metrics` instance so
//! several roles in one process report independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one role instance
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established at the transport level
    pub connections_total: AtomicU64,
    /// Currently open sessions (past the handshake)
    pub connections_active: AtomicU64,
    /// Outbound connect attempts (client only)
    pub connect_attempts: AtomicU64,
    /// Failed outbound connect attempts (client only)
    pub connect_failures: AtomicU64,
    /// Connections discarded because they looped back to themselves
    pub self_connections: AtomicU64,
    /// Successful handshakes
    pub handshakes_success: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Total frames queued for sending
    pub messages_sent: AtomicU64,
    /// Total frames received and decoded
    pub messages_received: AtomicU64,
    /// Total bytes queued for sending, headers included
    pub bytes_sent: AtomicU64,
    /// Total body bytes received
    pub bytes_received: AtomicU64,
    /// Sessions terminated by an oversized or undecodable frame
    pub protocol_errors: AtomicU64,
    /// Application callbacks that panicked
    pub callback_panics: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            self_connections: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new transport connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session entering the connected state
    pub fn session_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connected session closing
    pub fn session_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an outbound connect attempt
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed outbound connect attempt
    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded self-connection
    pub fn self_connection(&self) {
        self.self_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful handshake
    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handshake
    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame queued for sending
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame received
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a panicking callback
    pub fn callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            self_connections: self.self_connections.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connect_attempts = snapshot.connect_attempts,
            connect_failures = snapshot.connect_failures,
            self_connections = snapshot.self_connections,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            protocol_errors = snapshot.protocol_errors,
            callback_panics = snapshot.callback_panics,
            uptime_seconds = snapshot.uptime_seconds,
            "Messaging metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub self_connections: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub protocol_errors: u64,
    pub callback_panics: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters_balance() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.session_opened();
        metrics.message_sent(10);
        metrics.message_sent(6);
        metrics.session_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 1);
        assert_eq!(snap.connections_active, 0);
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.bytes_sent, 16);
    }
}
