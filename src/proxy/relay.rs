use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use super::pump::{pump, SampleRecorder};
use super::{chain, headers};
use crate::error::ProxyError;
use crate::AppState;

// ─── Request types ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    /// Absolute http(s) URL of the media on its origin
    pub target: Option<String>,
}

// ─── OPTIONS /proxy/media ────────────────────────────────────────

/// Pre-flight for cross-origin players; CORS headers come from the layer.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ─── GET /proxy/media ────────────────────────────────────────────

pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    relay(&state, Method::GET, query, &headers).await
}

// ─── HEAD /proxy/media ───────────────────────────────────────────

pub async fn head_media(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    relay(&state, Method::HEAD, query, &headers).await
}

// ─── Shared relay path ───────────────────────────────────────────

/// Checks that `target` is a non-blank absolute http(s) URL.
pub fn validate_target(target: Option<&str>) -> Result<Url, ProxyError> {
    let target = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ProxyError::MissingTarget)?;

    let parsed = Url::parse(target).map_err(|_| ProxyError::InvalidTarget)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ProxyError::InvalidTarget),
    }
}

async fn relay(
    state: &AppState,
    method: Method,
    query: MediaQuery,
    inbound: &HeaderMap,
) -> Result<Response, ProxyError> {
    let target = validate_target(query.target.as_deref())?;
    let resolved = chain::resolve(target.as_str(), &state.chain)?;

    let request = state
        .client
        .request(method.clone(), &resolved.url)
        .headers(headers::outbound_request_headers(inbound, &resolved.headers))
        .build()
        .map_err(|e| ProxyError::RequestBuild(e.to_string()))?;

    let span = info_span!("relay", %method, target = %target);

    // ── Outbound round-trip (headers only) ──────────────────────
    let recorder = SampleRecorder::start(state.metrics.clone());
    let sent = tokio::time::timeout(state.upstream_header_timeout, state.client.execute(request))
        .instrument(span.clone())
        .await;
    let upstream = match sent {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(err)) => return Err(upstream_failed(recorder, err.to_string(), &span)),
        Err(_) => {
            let message = format!(
                "no response headers within {}s",
                state.upstream_header_timeout.as_secs_f64()
            );
            return Err(upstream_failed(recorder, message, &span));
        }
    };
    // ────────────────────────────────────────────────────────────

    let status = upstream.status();
    span.in_scope(|| debug!(status = status.as_u16(), "upstream responded"));

    let response_headers = headers::relayed_response_headers(upstream.headers());

    let body = if method == Method::HEAD {
        recorder.finish(0, status.as_u16(), None);
        Body::empty()
    } else {
        let (tx, rx) = mpsc::channel(state.channel_depth);
        tokio::spawn(pump(upstream, tx, state.buffers.acquire(), recorder).instrument(span));
        Body::from_stream(ReceiverStream::new(rx))
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn upstream_failed(recorder: SampleRecorder, message: String, span: &tracing::Span) -> ProxyError {
    span.in_scope(|| warn!(error = %message, "upstream request failed"));
    recorder.finish(0, StatusCode::BAD_GATEWAY.as_u16(), Some(message.clone()));
    ProxyError::Upstream(message)
}
