//! Chained streaming media relay.
//!
//! A request for `/proxy/media?target=<url>` is wrapped through the configured
//! hops, forwarded with an allow-listed header set, and its body streamed back
//! through a pooled buffer. Every attempt lands one sample in the shared
//! [`MetricsWindow`](crate::metrics::MetricsWindow); the [`hop_puller`] keeps
//! the window's view of each upstream hop fresh.

pub mod buffer;
pub mod chain;
pub mod headers;
pub mod hop_puller;
pub mod pump;
pub mod relay;

pub use buffer::BufferPool;
pub use chain::{ChainError, ChainHop, ResolvedTarget};
pub use hop_puller::{HopMetricsPuller, PullerHandle, SlowHopThresholds};
