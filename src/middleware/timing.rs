use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Adds a `Server-Timing` header and logs one line per request.
///
/// For relayed media the measured time ends when response headers are ready,
/// not when the body finishes streaming; full transfer time lands in the
/// metrics window instead.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let server_timing = format!("relay;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // The SSE feed stays open; its line would only report the handshake
    if !path.ends_with("/stream") {
        info!(
            status = response.status().as_u16(),
            %method,
            path = %path,
            micros = elapsed.as_micros() as u64,
            request_id = %request_id,
            "request"
        );
    }

    response
}
