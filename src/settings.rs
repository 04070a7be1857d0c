use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::proxy::chain::ChainHop;
use crate::proxy::hop_puller::SlowHopThresholds;

/// Prefix for environment overrides, e.g. `MEDIA_RELAY__LISTEN=0.0.0.0:9000`.
pub const ENV_PREFIX: &str = "MEDIA_RELAY";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Socket address the relay listens on
    pub listen: String,
    /// Tracing filter used when RUST_LOG is unset
    pub log_level: String,
    /// Token callers must present; no gate when unset
    pub auth_token: Option<String>,
    /// Relay hops in contact order
    pub proxy_chain: Vec<ChainHop>,
    pub metrics: MetricsSettings,
    pub upstream: UpstreamSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub window_size: usize,
    pub hop_poll_interval_secs: u64,
    pub hop_request_timeout_secs: u64,
    pub min_throughput_kbps: f64,
    pub max_p90_latency_ms: f64,
    pub slow_warn_cooldown_secs: u64,
    /// Tick of the SSE metrics feed
    pub stream_interval_ms: u64,
}

/// Outbound connection pool. No whole-request timeout is applied.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub max_idle_per_host: usize,
    pub idle_timeout_secs: u64,
    /// Covers TCP connect and TLS handshake
    pub connect_timeout_secs: u64,
    pub response_header_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub buffer_size: usize,
    pub pool_capacity: usize,
    /// Chunks allowed in flight between the upstream reader and the caller
    pub channel_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7788".into(),
            log_level: "info".into(),
            auth_token: None,
            proxy_chain: Vec::new(),
            metrics: MetricsSettings::default(),
            upstream: UpstreamSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            window_size: crate::metrics::DEFAULT_WINDOW_SIZE,
            hop_poll_interval_secs: 15,
            hop_request_timeout_secs: 5,
            min_throughput_kbps: 512.0,
            max_p90_latency_ms: 2000.0,
            slow_warn_cooldown_secs: 60,
            stream_interval_ms: 1000,
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: 64,
            idle_timeout_secs: 90,
            connect_timeout_secs: 15,
            response_header_timeout_secs: 15,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_size: crate::proxy::buffer::DEFAULT_BUFFER_SIZE,
            pool_capacity: 64,
            channel_depth: 4,
        }
    }
}

impl Settings {
    /// Loads an optional config file, then applies `MEDIA_RELAY__*` env overrides.
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::with_name(&file.as_ref().to_string_lossy()));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.normalized().validate()
    }

    /// Trims chain entries and drops the ones without an endpoint.
    fn normalized(mut self) -> Self {
        self.auth_token = self
            .auth_token
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        self.proxy_chain = self
            .proxy_chain
            .into_iter()
            .filter_map(|hop| {
                let endpoint = hop.endpoint.trim();
                if endpoint.is_empty() {
                    return None;
                }
                let token = hop.auth_token.as_deref().map(str::trim);
                Some(ChainHop::new(endpoint, token.filter(|t| !t.is_empty())))
            })
            .collect();
        self
    }

    fn validate(self) -> Result<Self, SettingsError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
            SettingsError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.metrics.window_size == 0 {
            return Err(invalid("metrics.window_size", "must be greater than zero"));
        }
        if self.metrics.hop_poll_interval_secs == 0 {
            return Err(invalid("metrics.hop_poll_interval_secs", "must be greater than zero"));
        }
        if self.metrics.hop_request_timeout_secs == 0 {
            return Err(invalid("metrics.hop_request_timeout_secs", "must be greater than zero"));
        }
        if self.metrics.stream_interval_ms == 0 {
            return Err(invalid("metrics.stream_interval_ms", "must be greater than zero"));
        }
        if self.upstream.response_header_timeout_secs == 0 {
            return Err(invalid(
                "upstream.response_header_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.stream.buffer_size == 0 {
            return Err(invalid("stream.buffer_size", "must be greater than zero"));
        }
        if self.stream.channel_depth == 0 {
            return Err(invalid("stream.channel_depth", "must be greater than zero"));
        }

        for hop in &self.proxy_chain {
            let parsed = Url::parse(hop.base())
                .map_err(|e| invalid("proxy_chain", format!("{}: {e}", hop.endpoint)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(
                    "proxy_chain",
                    format!("{}: scheme must be http or https", hop.endpoint),
                ));
            }
        }

        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.metrics.hop_poll_interval_secs)
    }

    pub fn hop_request_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics.hop_request_timeout_secs)
    }

    pub fn slow_hop_thresholds(&self) -> SlowHopThresholds {
        SlowHopThresholds {
            min_throughput_kbps: self.metrics.min_throughput_kbps,
            max_p90_latency_ms: self.metrics.max_p90_latency_ms,
            warn_cooldown: Duration::from_secs(self.metrics.slow_warn_cooldown_secs),
        }
    }

    /// The shared outbound client. Pooled, without an overall timeout and
    /// without transparent decompression.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(self.upstream.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.upstream.idle_timeout_secs))
            .connect_timeout(Duration::from_secs(self.upstream.connect_timeout_secs))
            .tcp_nodelay(true)
            .build()
    }
}
