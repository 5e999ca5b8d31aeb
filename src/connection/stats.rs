//! Router and connection statistics
//!
//! Counters are shared by the session router and every connection actor it
//! creates. They are the main way packet drops become visible, since the
//! packet path never returns errors to its caller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic router statistics
#[derive(Debug, Default)]
pub struct RouterStats {
    /// Sessions created
    sessions_created: AtomicU64,
    /// Sessions removed after their connection closed
    sessions_evicted: AtomicU64,
    /// Packets handed to the router
    packets_received: AtomicU64,
    /// Payloads written to a redirect socket
    packets_forwarded: AtomicU64,
    /// Packets dropped because the session table was full
    packets_dropped_capacity: AtomicU64,
    /// Payloads dropped because the actor was not connected
    packets_dropped_unconnected: AtomicU64,
    /// Packets dropped because the router queue was full
    packets_dropped_queue: AtomicU64,
    /// Payloads dropped because a session's actor queue was full
    packets_dropped_busy: AtomicU64,
    /// Failed connect attempts
    connect_failures: AtomicU64,
    /// Failed writes on established connections
    send_errors: AtomicU64,
    /// Bytes written to redirect sockets
    bytes_sent: AtomicU64,
    /// Bytes read from redirect sockets
    bytes_received: AtomicU64,
    /// Replies discarded because the reply queue was full
    replies_dropped: AtomicU64,
}

impl RouterStats {
    /// Create new statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session
    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session removed from the table
    pub fn record_session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet entering the router
    pub fn record_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload written to a redirect socket
    pub fn record_forwarded(&self, bytes: usize) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a packet dropped at the session limit
    pub fn record_dropped_capacity(&self) {
        self.packets_dropped_capacity.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload dropped before the connection was up
    pub fn record_dropped_unconnected(&self) {
        self.packets_dropped_unconnected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet dropped on a full router queue
    pub fn record_dropped_queue(&self) {
        self.packets_dropped_queue.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload dropped on a full actor queue
    pub fn record_dropped_busy(&self) {
        self.packets_dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed connect attempt
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed write
    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes read from a redirect socket
    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a reply that could not be queued
    pub fn record_reply_dropped(&self) {
        self.replies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get sessions created
    #[must_use]
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    /// Get sessions evicted
    #[must_use]
    pub fn sessions_evicted(&self) -> u64 {
        self.sessions_evicted.load(Ordering::Relaxed)
    }

    /// Get packets received
    #[must_use]
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Get packets forwarded
    #[must_use]
    pub fn packets_forwarded(&self) -> u64 {
        self.packets_forwarded.load(Ordering::Relaxed)
    }

    /// Get packets dropped at the session limit
    #[must_use]
    pub fn packets_dropped_capacity(&self) -> u64 {
        self.packets_dropped_capacity.load(Ordering::Relaxed)
    }

    /// Get payloads dropped before connect
    #[must_use]
    pub fn packets_dropped_unconnected(&self) -> u64 {
        self.packets_dropped_unconnected.load(Ordering::Relaxed)
    }

    /// Get packets dropped on a full queue
    #[must_use]
    pub fn packets_dropped_queue(&self) -> u64 {
        self.packets_dropped_queue.load(Ordering::Relaxed)
    }

    /// Get payloads dropped on a full actor queue
    #[must_use]
    pub fn packets_dropped_busy(&self) -> u64 {
        self.packets_dropped_busy.load(Ordering::Relaxed)
    }

    /// Get failed connect attempts
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Get failed writes
    #[must_use]
    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Get bytes sent
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes received
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get replies dropped
    #[must_use]
    pub fn replies_dropped(&self) -> u64 {
        self.replies_dropped.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_created: self.sessions_created(),
            sessions_evicted: self.sessions_evicted(),
            packets_received: self.packets_received(),
            packets_forwarded: self.packets_forwarded(),
            packets_dropped_capacity: self.packets_dropped_capacity(),
            packets_dropped_unconnected: self.packets_dropped_unconnected(),
            packets_dropped_queue: self.packets_dropped_queue(),
            packets_dropped_busy: self.packets_dropped_busy(),
            connect_failures: self.connect_failures(),
            send_errors: self.send_errors(),
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            replies_dropped: self.replies_dropped(),
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.sessions_created,
            &self.sessions_evicted,
            &self.packets_received,
            &self.packets_forwarded,
            &self.packets_dropped_capacity,
            &self.packets_dropped_unconnected,
            &self.packets_dropped_queue,
            &self.packets_dropped_busy,
            &self.connect_failures,
            &self.send_errors,
            &self.bytes_sent,
            &self.bytes_received,
            &self.replies_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of router statistics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Sessions created
    pub sessions_created: u64,
    /// Sessions evicted
    pub sessions_evicted: u64,
    /// Packets received
    pub packets_received: u64,
    /// Payloads forwarded
    pub packets_forwarded: u64,
    /// Packets dropped at the session limit
    pub packets_dropped_capacity: u64,
    /// Payloads dropped before connect
    pub packets_dropped_unconnected: u64,
    /// Packets dropped on a full queue
    pub packets_dropped_queue: u64,
    /// Payloads dropped on a full actor queue
    pub packets_dropped_busy: u64,
    /// Failed connect attempts
    pub connect_failures: u64,
    /// Failed writes
    pub send_errors: u64,
    /// Bytes sent to redirect targets
    pub bytes_sent: u64,
    /// Bytes received from redirect targets
    pub bytes_received: u64,
    /// Replies dropped
    pub replies_dropped: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Total packets dropped for any reason
    #[must_use]
    pub const fn total_dropped(&self) -> u64 {
        self.packets_dropped_capacity
            + self.packets_dropped_unconnected
            + self.packets_dropped_queue
            + self.packets_dropped_busy
    }

    /// Sessions still in the table
    #[must_use]
    pub const fn active_sessions(&self) -> u64 {
        self.sessions_created.saturating_sub(self.sessions_evicted)
    }
}
