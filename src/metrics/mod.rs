pub mod percentiles;
pub mod stream;
pub mod window;

use chrono::{DateTime, Utc};
use std::time::Duration;

pub use window::{HopSnapshot, MetricsSnapshot, MetricsWindow, DEFAULT_WINDOW_SIZE};

/// One completed relay attempt.
/// Created once when the response finishes (or fails) and never mutated.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Wall time from issuing the outbound request to the end of the copy
    pub latency: Duration,
    /// Body bytes delivered to the caller
    pub bytes: u64,
    /// `status < 400`
    pub success: bool,
    /// Upstream status, or the synthetic status the relay answered with
    pub status: u16,
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}
