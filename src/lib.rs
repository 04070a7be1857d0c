//! Chained streaming media relay with live quality metrics.

use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod server;
pub mod settings;

use metrics::MetricsWindow;
use proxy::{BufferPool, ChainHop};
use settings::Settings;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Pooled outbound client shared by the relay and the hop puller.
    pub client: reqwest::Client,

    /// Relay hops in contact order; empty means talk to origins directly.
    pub chain: Vec<ChainHop>,

    /// Process-wide quality window; relays push samples, endpoints read snapshots.
    pub metrics: Arc<MetricsWindow>,

    /// Copy buffers reused across streamed responses.
    pub buffers: BufferPool,

    /// Inbound token gate; `None` leaves the relay open.
    pub auth_token: Option<String>,

    /// Longest wait for upstream response headers.
    pub upstream_header_timeout: Duration,

    /// Chunks buffered between the upstream reader and the caller.
    pub channel_depth: usize,

    /// Tick of the SSE metrics feed.
    pub stream_interval: Duration,
}

impl AppState {
    /// State with default tuning; used directly by tests and embedders.
    pub fn new(client: reqwest::Client, chain: Vec<ChainHop>, metrics: Arc<MetricsWindow>) -> Self {
        let defaults = Settings::default();
        Self {
            client,
            chain,
            metrics,
            buffers: BufferPool::new(defaults.stream.buffer_size, defaults.stream.pool_capacity),
            auth_token: None,
            upstream_header_timeout: Duration::from_secs(
                defaults.upstream.response_header_timeout_secs,
            ),
            channel_depth: defaults.stream.channel_depth,
            stream_interval: Duration::from_millis(defaults.metrics.stream_interval_ms),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
        metrics: Arc<MetricsWindow>,
    ) -> Self {
        Self {
            client,
            chain: settings.proxy_chain.clone(),
            metrics,
            buffers: BufferPool::new(settings.stream.buffer_size, settings.stream.pool_capacity),
            auth_token: settings.auth_token.clone(),
            upstream_header_timeout: Duration::from_secs(
                settings.upstream.response_header_timeout_secs,
            ),
            channel_depth: settings.stream.channel_depth.max(1),
            stream_interval: Duration::from_millis(settings.metrics.stream_interval_ms.max(1)),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_upstream_header_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_header_timeout = timeout;
        self
    }
}
