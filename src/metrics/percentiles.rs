use serde::{Deserialize, Serialize};

/// Latency percentiles reported for one window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileSet {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl PercentileSet {
    /// Computes p50/p90/p99 from latencies already sorted ascending.
    /// Returns zeroed values for an empty slice.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            p50: percentile(sorted, 50.0),
            p90: percentile(sorted, 90.0),
            p99: percentile(sorted, 99.0),
        }
    }
}

/// Linear-interpolation percentile over an ascending slice.
///
/// The rank is `p / 100 * (n - 1)`; values between two ranks are blended by
/// the fractional part. `p <= 0` yields the minimum, `p >= 100` the maximum.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let Some(&first) = sorted.first() else {
        return 0.0;
    };
    let last = sorted[sorted.len() - 1];
    if p <= 0.0 {
        return first;
    }
    if p >= 100.0 {
        return last;
    }

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = lower + 1;
    if upper >= sorted.len() {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}
