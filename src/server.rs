use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::metrics::stream;
use crate::middleware::{auth, cors, timing};
use crate::proxy::chain::{METRICS_PATH, RELAY_PATH};
use crate::proxy::relay;
use crate::AppState;

/// SSE variant of the metrics endpoint.
pub const METRICS_STREAM_PATH: &str = "/proxy/metrics/stream";

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Media relay ─────────────────────────────────────────
        .route(
            RELAY_PATH,
            get(relay::get_media)
                .head(relay::head_media)
                .options(relay::preflight),
        )
        // ── Metrics ─────────────────────────────────────────────
        .route(METRICS_PATH, get(stream::get_metrics))
        .route(METRICS_STREAM_PATH, get(stream::metrics_stream))
        // ── Token gate on every matched route ───────────────────
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(cors::cors_headers))
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
