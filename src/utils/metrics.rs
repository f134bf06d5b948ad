//! Observability counters.
//!
//! Atomic counters owned by a [`crate::service::server::Server`] (or a
//! client) and shared with its connections through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct Metrics {
    /// Sockets accepted or dialed
    pub connections_total: AtomicU64,
    /// Connections not yet closed
    pub connections_active: AtomicU64,
    /// Peers that completed identification
    pub identifications_success: AtomicU64,
    /// Unknown public ids and malformed first frames
    pub identifications_failed: AtomicU64,
    /// Lobby entries evicted by the grace-period sweep
    pub lobby_evictions: AtomicU64,
    /// Frames written
    pub frames_sent: AtomicU64,
    /// Frames read
    pub frames_received: AtomicU64,
    /// Bytes written, framing excluded
    pub bytes_sent: AtomicU64,
    /// Bytes read, framing excluded
    pub bytes_received: AtomicU64,
    /// Outstanding requests that received their reply
    pub requests_fulfilled: AtomicU64,
    /// Outstanding requests that expired
    pub requests_timed_out: AtomicU64,
    /// Connections closed by a fatal fault
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            identifications_success: AtomicU64::new(0),
            identifications_failed: AtomicU64::new(0),
            lobby_evictions: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            requests_fulfilled: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn identification_success(&self) {
        self.identifications_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identification_failed(&self) {
        self.identifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lobby_evicted(&self, count: u64) {
        self.lobby_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn request_fulfilled(&self) {
        self.requests_fulfilled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_expired(&self, count: u64) {
        self.requests_timed_out.fetch_add(count, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            identifications_success: self.identifications_success.load(Ordering::Relaxed),
            identifications_failed: self.identifications_failed.load(Ordering::Relaxed),
            lobby_evictions: self.lobby_evictions.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            requests_fulfilled: self.requests_fulfilled.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
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
            identifications_success = snapshot.identifications_success,
            identifications_failed = snapshot.identifications_failed,
            lobby_evictions = snapshot.lobby_evictions,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            requests_fulfilled = snapshot.requests_fulfilled,
            requests_timed_out = snapshot.requests_timed_out,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Bridge metrics snapshot"
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
    pub identifications_success: u64,
    pub identifications_failed: u64,
    pub lobby_evictions: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub requests_fulfilled: u64,
    pub requests_timed_out: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}
