//! Loopback origins and relay nodes shared by the integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use media_relay::metrics::MetricsWindow;
use media_relay::proxy::ChainHop;
use media_relay::{server, AppState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const VIDEO_LEN: usize = 1000;

/// How long `/stalled` holds back its response headers.
pub const STALLED_HEADERS_DELAY: Duration = Duration::from_secs(5);

/// Serves `app` on an ephemeral loopback port.
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct Origin {
    pub addr: SocketAddr,
    /// Set once the endless stream's body has been dropped by the server
    pub endless_closed: Arc<AtomicBool>,
}

impl Origin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

fn video_bytes() -> Vec<u8> {
    (0..VIDEO_LEN).map(|i| (i % 251) as u8).collect()
}

async fn video(headers: HeaderMap) -> Response {
    let data = video_bytes();
    let mut extra = HeaderMap::new();
    extra.insert(header::CONTENT_TYPE, "video/mp4".parse().unwrap());
    extra.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    if let Some(ua) = headers.get(header::USER_AGENT) {
        extra.insert("x-seen-user-agent", ua.clone());
    }
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        extra.insert("x-seen-authorization", auth.clone());
    }
    let saw_internal = if headers.contains_key("x-internal") { "yes" } else { "no" };
    extra.insert("x-saw-internal", saw_internal.parse().unwrap());

    // Only the simple `bytes=a-b` form is needed here
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

    match range {
        Some((start, end)) if start <= end && end < VIDEO_LEN => {
            extra.insert(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{VIDEO_LEN}").parse().unwrap(),
            );
            (
                StatusCode::PARTIAL_CONTENT,
                extra,
                data[start..=end].to_vec(),
            )
                .into_response()
        }
        _ => (StatusCode::OK, extra, data).into_response(),
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub async fn spawn_origin() -> Origin {
    let endless_closed = Arc::new(AtomicBool::new(false));
    let closed = endless_closed.clone();

    let app = Router::new()
        .route("/video", get(video))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/stalled",
            get(|| async {
                tokio::time::sleep(STALLED_HEADERS_DELAY).await;
                StatusCode::OK
            }),
        )
        .route(
            "/garbage/proxy/metrics",
            get(|| async { "definitely not json" }),
        )
        .route(
            "/endless",
            get(move || {
                let flag = DropFlag(closed.clone());
                async move {
                    let stream = futures_util::stream::unfold(flag, |flag| async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Some((Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 4096])), flag))
                    });
                    Body::from_stream(stream)
                }
            }),
        );

    Origin {
        addr: spawn(app).await,
        endless_closed,
    }
}

pub struct Relay {
    pub addr: SocketAddr,
    pub metrics: Arc<MetricsWindow>,
}

impl Relay {
    pub fn media_url(&self, target: &str) -> String {
        let mut url = reqwest::Url::parse(&format!("http://{}/proxy/media", self.addr)).unwrap();
        url.query_pairs_mut().append_pair("target", target);
        url.into()
    }

    pub fn metrics_url(&self) -> String {
        format!("http://{}/proxy/metrics", self.addr)
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}

pub async fn spawn_relay(chain: Vec<ChainHop>, auth_token: Option<&str>) -> Relay {
    spawn_relay_with(chain, |state| match auth_token {
        Some(token) => state.with_auth_token(token),
        None => state,
    })
    .await
}

/// Relay node whose default state is adjusted by `configure` before serving.
pub async fn spawn_relay_with(
    chain: Vec<ChainHop>,
    configure: impl FnOnce(AppState) -> AppState,
) -> Relay {
    let metrics = Arc::new(MetricsWindow::default());
    let state = configure(AppState::new(reqwest::Client::new(), chain, metrics.clone()));
    let addr = spawn(server::create_router(Arc::new(state))).await;
    Relay { addr, metrics }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
