//! Observability and Metrics
//!
//! Counters describing what a transport driver has done: handshakes,
//! traffic, fragmentation and everything it had to drop.
//!
//! Each driver owns its own [`Metrics`]; counters are atomics so a snapshot
//! can be taken through a shared reference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one transport driver
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Outbound handshakes started
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached Connected
    pub handshakes_success: AtomicU64,
    /// Handshakes abandoned after the last retry
    pub handshakes_failed: AtomicU64,
    /// Handshake packets resent by the retry policy
    pub handshake_retries: AtomicU64,
    /// Connection rejects sent for lack of capacity or received from a peer
    pub connections_rejected: AtomicU64,
    /// Connected slots closed for inactivity
    pub idle_timeouts: AtomicU64,
    /// Total datagrams sent
    pub packets_sent: AtomicU64,
    /// Total datagrams received
    pub packets_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Fragments sent
    pub fragments_sent: AtomicU64,
    /// Fragments received
    pub fragments_received: AtomicU64,
    /// Payloads rebuilt from fragments
    pub packets_reassembled: AtomicU64,
    /// Partial payloads evicted from a reassembly slot
    pub reassembly_evictions: AtomicU64,
    /// Events dropped because a connection's queue was full
    pub events_dropped: AtomicU64,
    /// Malformed or unexpected packets
    pub protocol_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            handshake_retries: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            fragments_sent: AtomicU64::new(0),
            fragments_received: AtomicU64::new(0),
            packets_reassembled: AtomicU64::new(0),
            reassembly_evictions: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record a handshake attempt
    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful handshake
    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handshake
    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_retry(&self) {
        self.handshake_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram sent
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram received
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn fragment_sent(&self) {
        self.fragments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragment_received(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_reassembled(&self) {
        self.packets_reassembled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reassembly_eviction(&self, count: u64) {
        self.reassembly_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            handshake_retries: self.handshake_retries.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            packets_reassembled: self.packets_reassembled.load(Ordering::Relaxed),
            reassembly_evictions: self.reassembly_evictions.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            handshake_retries = snapshot.handshake_retries,
            connections_rejected = snapshot.connections_rejected,
            idle_timeouts = snapshot.idle_timeouts,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            fragments_sent = snapshot.fragments_sent,
            fragments_received = snapshot.fragments_received,
            packets_reassembled = snapshot.packets_reassembled,
            reassembly_evictions = snapshot.reassembly_evictions,
            events_dropped = snapshot.events_dropped,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
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
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub handshake_retries: u64,
    pub connections_rejected: u64,
    pub idle_timeouts: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub packets_reassembled: u64,
    pub reassembly_evictions: u64,
    pub events_dropped: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}
