use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::chain::{ChainHop, METRICS_PATH};
use crate::metrics::{HopSnapshot, MetricsSnapshot, MetricsWindow};

// ─── Configuration ───────────────────────────────────────────────

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Synthetic status for a hop request that could not be built
const MALFORMED_STATUS: u16 = 400;
/// Synthetic status for network and decode failures
const UNREACHABLE_STATUS: u16 = 502;

/// When a hop counts as a bottleneck, and how often to say so.
#[derive(Debug, Clone, Copy)]
pub struct SlowHopThresholds {
    /// Below this (and above zero) the hop is slow; roughly 0.5 MB/s
    pub min_throughput_kbps: f64,
    /// Above this p90 the hop is slow
    pub max_p90_latency_ms: f64,
    /// Minimum gap between two warnings for the same endpoint
    pub warn_cooldown: Duration,
}

impl Default for SlowHopThresholds {
    fn default() -> Self {
        Self {
            min_throughput_kbps: 512.0,
            max_p90_latency_ms: 2000.0,
            warn_cooldown: Duration::from_secs(60),
        }
    }
}

impl SlowHopThresholds {
    /// Zero throughput means "no data yet" and never counts as slow.
    pub fn is_slow(&self, hop: &HopSnapshot) -> bool {
        let throughput = hop.avg_throughput_kbps;
        (throughput > 0.0 && throughput < self.min_throughput_kbps)
            || hop.p90_latency_ms > self.max_p90_latency_ms
    }
}

// ─── Puller ──────────────────────────────────────────────────────

/// Periodically pulls every hop's own `/proxy/metrics` and attaches the
/// results to the local window, so any node can show the whole chain.
pub struct HopMetricsPuller {
    metrics: Arc<MetricsWindow>,
    hops: Vec<ChainHop>,
    client: reqwest::Client,
    interval: Duration,
    request_timeout: Duration,
    thresholds: SlowHopThresholds,
    last_warn: HashMap<String, Instant>,
}

/// Stop signal and join handle for a spawned puller.
pub struct PullerHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HopMetricsPuller {
    pub fn new(metrics: Arc<MetricsWindow>, hops: Vec<ChainHop>, client: reqwest::Client) -> Self {
        Self {
            metrics,
            hops,
            client,
            interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            thresholds: SlowHopThresholds::default(),
            last_warn: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.request_timeout = timeout;
        }
        self
    }

    pub fn with_thresholds(mut self, thresholds: SlowHopThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Starts the polling loop. With no hops configured nothing is spawned,
    /// but the returned handle still behaves normally.
    pub fn spawn(self) -> PullerHandle {
        let shutdown = CancellationToken::new();
        if self.hops.is_empty() {
            return PullerHandle {
                shutdown,
                task: None,
            };
        }

        info!(
            hops = self.hops.len(),
            interval_secs = self.interval.as_secs_f64(),
            "hop metrics puller started"
        );
        let task = tokio::spawn(self.run(shutdown.clone()));
        PullerHandle {
            shutdown,
            task: Some(task),
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        // First pull one full interval after start
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("hop metrics puller stopped");
                    break;
                }
                _ = ticker.tick() => self.pull().await,
            }
        }
    }

    /// One polling pass over every hop, in configured order.
    ///
    /// Failures become placeholder entries; the whole list replaces the
    /// window's previous one in a single swap.
    pub async fn pull(&mut self) {
        let mut snapshots = Vec::with_capacity(self.hops.len());
        // Later hops report slowness caused by the first slow one
        let mut root_flagged = false;

        for hop in &self.hops {
            let endpoint = hop.base();
            if endpoint.is_empty() {
                continue;
            }

            let snapshot = match self.fetch(hop, endpoint).await {
                Ok(remote) => HopSnapshot::from_remote(endpoint, &remote, Utc::now()),
                Err(failure) => {
                    warn!(
                        endpoint,
                        status = failure.status,
                        error = %failure.message,
                        "hop metrics pull failed"
                    );
                    snapshots.push(HopSnapshot::failed(
                        endpoint,
                        failure.message,
                        failure.status,
                    ));
                    continue;
                }
            };

            if !root_flagged && self.thresholds.is_slow(&snapshot) {
                root_flagged = true;
                warn_slow(
                    &mut self.last_warn,
                    &self.thresholds,
                    &snapshot,
                    Instant::now(),
                );
            }
            snapshots.push(snapshot);
        }

        self.metrics.attach_hops(snapshots);
    }

    async fn fetch(&self, hop: &ChainHop, endpoint: &str) -> Result<MetricsSnapshot, PullFailure> {
        let url = format!("{endpoint}{METRICS_PATH}");
        let mut builder = self.client.get(&url).timeout(self.request_timeout);
        if let Some(token) = hop.token() {
            builder = builder.bearer_auth(token);
        }

        let request = builder
            .build()
            .map_err(|e| PullFailure::new(e.to_string(), MALFORMED_STATUS))?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| PullFailure::new(e.to_string(), UNREACHABLE_STATUS))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PullFailure::new(
                format!("unexpected status {}", status.as_u16()),
                status.as_u16(),
            ));
        }

        response
            .json::<MetricsSnapshot>()
            .await
            .map_err(|e| PullFailure::new(e.to_string(), UNREACHABLE_STATUS))
    }
}

/// Why one hop produced no snapshot this pass.
#[derive(Debug)]
struct PullFailure {
    message: String,
    status: u16,
}

impl PullFailure {
    fn new(message: String, status: u16) -> Self {
        Self { message, status }
    }
}

/// Logs a slow hop unless the same endpoint was reported within the cooldown.
/// Returns whether a warning was emitted.
fn warn_slow(
    last_warn: &mut HashMap<String, Instant>,
    thresholds: &SlowHopThresholds,
    hop: &HopSnapshot,
    now: Instant,
) -> bool {
    if hop.endpoint.is_empty() || !thresholds.is_slow(hop) {
        return false;
    }
    if let Some(last) = last_warn.get(&hop.endpoint) {
        if now.saturating_duration_since(*last) < thresholds.warn_cooldown {
            return false;
        }
    }

    warn!(
        endpoint = %hop.endpoint,
        throughput_kbps = hop.avg_throughput_kbps,
        p90_ms = hop.p90_latency_ms,
        p50_ms = hop.p50_latency_ms,
        success_rate = hop.success_rate,
        status = hop.last_status,
        error = %hop.last_error,
        "proxy hop slow"
    );
    last_warn.insert(hop.endpoint.clone(), now);
    true
}

impl PullerHandle {
    /// Signals the loop to exit. Safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            // A panicked poll pass has nothing left to clean up
            let _ = task.await;
        }
    }
}
