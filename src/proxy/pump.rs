use bytes::Bytes;
use futures_util::TryStreamExt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::buffer::PooledBuffer;
use crate::metrics::MetricsWindow;

/// Status recorded when a request is abandoned before upstream headers arrive.
const CANCELLED_STATUS: u16 = 502;

/// Owes the metrics window exactly one sample for a relay attempt.
///
/// `finish` consumes it; dropping it unfinished (the handler future was
/// cancelled mid-flight) records a failed sample instead.
pub struct SampleRecorder {
    metrics: Arc<MetricsWindow>,
    started: Instant,
    finished: bool,
}

impl SampleRecorder {
    /// Starts the latency clock; call right before the outbound request is issued.
    pub fn start(metrics: Arc<MetricsWindow>) -> Self {
        Self {
            metrics,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self, bytes: u64, status: u16, error: Option<String>) {
        self.finished = true;
        self.metrics.record(
            self.started.elapsed(),
            bytes,
            status < 400,
            status,
            error,
        );
    }
}

impl Drop for SampleRecorder {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics.record(
                self.started.elapsed(),
                0,
                false,
                CANCELLED_STATUS,
                Some("request cancelled".into()),
            );
        }
    }
}

/// How a body copy ended.
#[derive(Debug, PartialEq, Eq)]
enum CopyEnd {
    Complete,
    CallerGone,
    Failed(String),
}

/// Copies the upstream body into the caller's response channel.
///
/// The copy also watches the channel: once the caller's body is dropped
/// (client disconnect) the upstream response is dropped right away, which
/// closes its connection instead of draining it. Exactly one sample is
/// recorded when the copy ends, however it ends.
pub async fn pump(
    upstream: reqwest::Response,
    tx: mpsc::Sender<io::Result<Bytes>>,
    mut buffer: PooledBuffer,
    recorder: SampleRecorder,
) {
    let status = upstream.status().as_u16();
    let body = upstream.bytes_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(Box::pin(body));

    let mut copied = 0u64;
    let end = loop {
        let read = tokio::select! {
            biased;
            _ = tx.closed() => break CopyEnd::CallerGone,
            read = reader.read(&mut buffer[..]) => read,
        };

        match read {
            Ok(0) => break CopyEnd::Complete,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buffer[..n]);
                if tx.send(Ok(chunk)).await.is_err() {
                    break CopyEnd::CallerGone;
                }
                copied += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                break CopyEnd::Complete;
            }
            Err(err) => {
                let message = err.to_string();
                // Abort the caller's response rather than ending it cleanly
                let _ = tx.send(Err(err)).await;
                break CopyEnd::Failed(message);
            }
        }
    };

    // Close the upstream body before the sample lands
    drop(reader);

    let error = match end {
        CopyEnd::Complete => None,
        CopyEnd::CallerGone => {
            debug!(bytes = copied, "caller went away, upstream closed");
            None
        }
        CopyEnd::Failed(message) => {
            warn!(bytes = copied, error = %message, "proxy stream interrupted");
            Some(message)
        }
    };
    recorder.finish(copied, status, error);
}
