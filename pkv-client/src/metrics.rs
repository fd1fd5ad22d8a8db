//! # Client Metrics
//!
//! Provide lightweight counters and a reply-latency histogram shared by a
//! client and every connection it opens.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Fixed Buckets**: Keep histogram buckets in a contiguous array for cache locality.
//! 3. **Zero-Cost Access**: Expose snapshots as plain structs without heap work
//!    beyond the bucket vectors.
//!
//! ## Notes
//! - Latency is measured from the end of a command's write to the moment its
//!   reply is fully decoded, so time spent queued behind a blocking command
//!   is not counted.
//! - Bucket boundaries are expressed in microseconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 14] = [
    10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 50_000, 100_000, 1_000_000, 10_000_000,
];

/// Snapshot of all client metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Commands handed to the client or a connection.
    pub commands_submitted: u64,
    /// Commands fully written to a socket.
    pub commands_sent: u64,
    /// Replies decoded, including error replies.
    pub replies: u64,
    /// Error replies reported by the server.
    pub server_errors: u64,
    /// Commands cancelled because their connection closed.
    pub cancelled: u64,
    /// Connections that became ready.
    pub connections_opened: u64,
    /// Connections that closed.
    pub connections_closed: u64,
    /// Commands written and still awaiting a reply.
    pub inflight: u64,
    /// Reply latency histogram snapshot.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

impl LatencySnapshot {
    /// Mean latency, or zero without samples.
    pub fn mean(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_us / self.samples)
    }
}

/// Thread-safe metrics aggregator.
///
/// `Ordering::Relaxed` is sufficient because no reader relies on ordering
/// between fields, only on eventual totals.
#[derive(Debug)]
pub struct Metrics {
    commands_submitted: AtomicU64,
    commands_sent: AtomicU64,
    replies: AtomicU64,
    server_errors: AtomicU64,
    cancelled: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    inflight: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a metrics aggregator with the default latency buckets.
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a metrics aggregator with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        Metrics {
            commands_submitted: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            replies: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    pub fn record_submitted(&self) {
        self.commands_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a command whose bytes are now fully written.
    pub fn record_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decoded reply and its latency.
    pub fn record_reply(&self, latency: Option<Duration>, server_error: bool) {
        self.replies.fetch_add(1, Ordering::Relaxed);
        if server_error {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
        // Saturating: every reply follows its record_sent, but a snapshot
        // must never wrap around.
        let _ = self
            .inflight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
        if let Some(latency) = latency {
            self.latency.record(latency);
        }
    }

    /// Records a command cancelled by connection loss.
    pub fn record_cancelled(&self, was_sent: bool) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        if was_sent {
            let _ = self
                .inflight
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_submitted: self.commands_submitted.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Uses a linear scan to pick buckets; the list is short and stays hot in cache.
#[derive(Debug)]
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records a latency into the first bucket whose bound is not below it.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the histogram.
    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
