use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::percentiles::PercentileSet;
use super::Sample;

// ─── Configuration ───────────────────────────────────────────────

/// Samples kept in the live window when no size is configured
pub const DEFAULT_WINDOW_SIZE: usize = 120;

/// Shortest span used for rate math, so one fresh sample cannot blow up RPM
const MIN_SPAN_SECS: f64 = 1.0;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe ring of recent relay samples plus lifetime counters.
/// Relay handlers call `record()`, the metrics endpoints call `snapshot()`,
/// and the hop poller calls `attach_hops()`.
pub struct MetricsWindow {
    inner: Mutex<Inner>,
}

/// Point-in-time view of the window, computed fresh on every read.
///
/// The same shape is served by every relay node, so the hop poller decodes
/// it from peers as well. Missing fields decode as defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub window_samples: usize,
    pub samples: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_bytes: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub avg_throughput_kbps: f64,
    pub requests_per_minute: f64,
    pub last_status: u16,
    pub last_error: String,
    pub last_updated: Option<DateTime<Utc>>,
    /// Window capacity in slots; zero until the first sample lands
    pub window_duration_sec: f64,
    pub available_sample_span_sec: f64,
    pub hops: Vec<HopSnapshot>,
}

/// Health of one upstream hop as last pulled from its own metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HopSnapshot {
    pub endpoint: String,
    pub success_rate: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub requests_per_minute: f64,
    pub avg_throughput_kbps: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(skip_serializing_if = "is_zero_status")]
    pub last_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_seconds: Option<f64>,
}

fn is_zero_status(status: &u16) -> bool {
    *status == 0
}

impl HopSnapshot {
    /// Placeholder for a hop whose metrics could not be pulled.
    pub fn failed(endpoint: impl Into<String>, error: impl Into<String>, status: u16) -> Self {
        Self {
            endpoint: endpoint.into(),
            last_error: error.into(),
            last_status: status,
            ..Self::default()
        }
    }

    /// Re-projects a peer's snapshot; staleness is measured against `now`.
    pub fn from_remote(
        endpoint: impl Into<String>,
        remote: &MetricsSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let stale_seconds = remote
            .last_updated
            .map(|at| (now - at).num_milliseconds() as f64 / 1000.0);
        Self {
            endpoint: endpoint.into(),
            success_rate: remote.success_rate,
            p50_latency_ms: remote.p50_latency_ms,
            p90_latency_ms: remote.p90_latency_ms,
            p99_latency_ms: remote.p99_latency_ms,
            requests_per_minute: remote.requests_per_minute,
            avg_throughput_kbps: remote.avg_throughput_kbps,
            last_error: remote.last_error.clone(),
            last_status: remote.last_status,
            stale_seconds,
        }
    }
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    // Fixed ring; `None` slots have never been written
    slots: Vec<Option<Sample>>,
    next: usize,
    full: bool,

    // Lifetime counters
    total_requests: u64,
    total_errors: u64,
    total_bytes: u64,
    last_error: String,
    last_status: u16,
    last_updated: Option<DateTime<Utc>>,

    // Replaced wholesale by the hop poller
    hops: Vec<HopSnapshot>,
}

// ─── MetricsWindow impl ──────────────────────────────────────────

impl MetricsWindow {
    /// Creates a window holding `capacity` samples; zero falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_WINDOW_SIZE
        } else {
            capacity
        };
        Self {
            inner: Mutex::new(Inner::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Record one finished relay attempt.
    pub fn record(
        &self,
        latency: Duration,
        bytes: u64,
        success: bool,
        status: u16,
        error: Option<String>,
    ) {
        self.inner.lock().record(Sample {
            latency,
            bytes,
            success,
            status,
            error,
            observed_at: Utc::now(),
        });
    }

    /// Produce a read-only aggregate of the current window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot(Utc::now())
    }

    /// Swap in the hop list from the latest poll cycle.
    pub fn attach_hops(&self, hops: Vec<HopSnapshot>) {
        self.inner.lock().hops = hops;
    }
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            next: 0,
            full: false,
            total_requests: 0,
            total_errors: 0,
            total_bytes: 0,
            last_error: String::new(),
            last_status: 0,
            last_updated: None,
            hops: Vec::new(),
        }
    }

    fn record(&mut self, sample: Sample) {
        // ── Counters ────────────────────────────────────────────
        self.total_requests += 1;
        if !sample.success {
            self.total_errors += 1;
            self.last_error = sample.error.clone().unwrap_or_default();
        }
        self.total_bytes += sample.bytes;
        self.last_status = sample.status;
        self.last_updated = Some(sample.observed_at);

        // ── Ring write ──────────────────────────────────────────
        let slot = self.next;
        self.slots[slot] = Some(sample);
        self.next = (slot + 1) % self.slots.len();
        if self.next == 0 {
            self.full = true;
        }
    }

    /// Populated slots in buffer-slot order.
    fn window(&self) -> impl Iterator<Item = &Sample> {
        let limit = if self.full {
            self.slots.len()
        } else {
            self.next
        };
        self.slots[..limit].iter().flatten()
    }

    fn snapshot(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            window_samples: self.slots.len(),
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            total_bytes: self.total_bytes,
            last_status: self.last_status,
            last_error: self.last_error.clone(),
            last_updated: self.last_updated,
            hops: self.hops.clone(),
            ..MetricsSnapshot::default()
        };

        let mut successes = 0usize;
        let mut bytes_sum = 0u64;
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latencies = Vec::with_capacity(self.slots.len());

        for sample in self.window() {
            if earliest.map_or(true, |e| sample.observed_at < e) {
                earliest = Some(sample.observed_at);
            }
            if sample.success {
                successes += 1;
            }
            bytes_sum += sample.bytes;
            latencies.push(sample.latency.as_secs_f64() * 1000.0);
        }

        let (count, Some(earliest)) = (latencies.len(), earliest) else {
            return snapshot;
        };

        let span_secs =
            ((now - earliest).num_milliseconds() as f64 / 1000.0).max(MIN_SPAN_SECS);
        let latency_sum_ms: f64 = latencies.iter().sum();

        snapshot.samples = count;
        snapshot.window_duration_sec = self.slots.len() as f64;
        snapshot.available_sample_span_sec = span_secs;
        snapshot.success_rate = successes as f64 / count as f64;
        snapshot.requests_per_minute = count as f64 / (span_secs / 60.0);
        snapshot.avg_latency_ms = latency_sum_ms / count as f64;

        latencies.sort_by(f64::total_cmp);
        let set = PercentileSet::from_sorted(&latencies);
        snapshot.p50_latency_ms = set.p50;
        snapshot.p90_latency_ms = set.p90;
        snapshot.p99_latency_ms = set.p99;

        // Summed per-request latency stands in for serving time
        if latency_sum_ms > 0.0 {
            snapshot.avg_throughput_kbps =
                (bytes_sum as f64 / 1024.0) / (latency_sum_ms / 1000.0);
        }

        snapshot
    }
}
