mod common;

use common::{
    closed_addr, eventually, spawn_origin, spawn_relay, spawn_relay_with, STALLED_HEADERS_DELAY,
    VIDEO_LEN,
};
use media_relay::metrics::MetricsSnapshot;
use media_relay::proxy::ChainHop;
use reqwest::{header, StatusCode};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[tokio::test]
async fn get_streams_body_and_records_one_sample() {
    let origin = spawn_origin().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let response = reqwest::Client::new()
        .get(relay.media_url(&origin.url("/video")))
        .header(header::USER_AGENT, "player/1.0")
        .header("x-internal", "secret")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(headers["x-seen-user-agent"], "player/1.0");
    assert_eq!(headers["x-saw-internal"], "no");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(headers.contains_key("x-request-id"));

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), VIDEO_LEN);

    assert!(eventually(|| relay.metrics.snapshot().total_requests == 1).await);
    let snap = relay.metrics.snapshot();
    assert_eq!(snap.samples, 1);
    assert_eq!(snap.total_bytes, VIDEO_LEN as u64);
    assert_eq!(snap.total_errors, 0);
    assert_eq!(snap.last_status, 200);
    assert_eq!(snap.success_rate, 1.0);
}

#[tokio::test]
async fn range_requests_pass_through() {
    let origin = spawn_origin().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let response = reqwest::Client::new()
        .get(relay.media_url(&origin.url("/video")))
        .header(header::RANGE, "bytes=0-9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[header::CONTENT_RANGE],
        format!("bytes 0-9/{VIDEO_LEN}").as_str()
    );
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 10);

    assert!(eventually(|| relay.metrics.snapshot().total_bytes == 10).await);
    assert_eq!(relay.metrics.snapshot().last_status, 206);
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let origin = spawn_origin().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let response = reqwest::Client::new()
        .head(relay.media_url(&origin.url("/video")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert!(response.bytes().await.unwrap().is_empty());

    let snap = relay.metrics.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.total_bytes, 0);
    assert_eq!(snap.last_status, 200);
}

#[tokio::test]
async fn bad_targets_are_rejected_without_a_sample() {
    let relay = spawn_relay(Vec::new(), None).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("http://{}/proxy/media", relay.addr))
        .header(header::ORIGIN, "https://player.example")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        missing.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://player.example"
    );
    assert_eq!(missing.headers()[header::VARY], "Origin");
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "target is required");

    let blank = client.get(relay.media_url("   ")).send().await.unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let ftp = client
        .get(relay.media_url("ftp://files.example.com/a.mp4"))
        .send()
        .await
        .unwrap();
    assert_eq!(ftp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = ftp.json().await.unwrap();
    assert_eq!(body["error"], "invalid target url");

    assert_eq!(relay.metrics.snapshot().total_requests, 0);
}

#[tokio::test]
async fn unreachable_upstream_is_a_502_sample() {
    let dead = closed_addr().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let response = reqwest::Client::new()
        .get(relay.media_url(&format!("http://{dead}/video")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .starts_with("proxy request failed"));

    let snap = relay.metrics.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.total_errors, 1);
    assert_eq!(snap.last_status, 502);
    assert!(!snap.last_error.is_empty());
}

#[tokio::test]
async fn stalled_upstream_headers_time_out_as_502() {
    let origin = spawn_origin().await;
    let relay = spawn_relay_with(Vec::new(), |state| {
        state.with_upstream_header_timeout(Duration::from_millis(200))
    })
    .await;

    let started = Instant::now();
    let response = reqwest::get(relay.media_url(&origin.url("/stalled")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < STALLED_HEADERS_DELAY);

    let snap = relay.metrics.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.total_errors, 1);
    assert_eq!(snap.last_status, 502);
    assert!(snap.last_error.starts_with("no response headers within"));
}

#[tokio::test]
async fn upstream_error_status_is_relayed_and_counted() {
    let origin = spawn_origin().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let response = reqwest::get(relay.media_url(&origin.url("/missing")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let _ = response.bytes().await;

    assert!(eventually(|| relay.metrics.snapshot().total_requests == 1).await);
    let snap = relay.metrics.snapshot();
    assert_eq!(snap.total_errors, 1);
    assert_eq!(snap.last_status, 404);
}

#[tokio::test]
async fn preflight_is_empty_with_cors_headers() {
    let relay = spawn_relay(Vec::new(), Some("secret")).await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{}/proxy/media", relay.addr),
        )
        .header(header::ORIGIN, "https://player.example")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://player.example");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET,HEAD,OPTIONS");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
    assert_eq!(relay.metrics.snapshot().total_requests, 0);
}

#[tokio::test]
async fn metrics_endpoint_serves_snapshot() {
    let relay = spawn_relay(Vec::new(), None).await;

    let snap: serde_json::Value = reqwest::get(relay.metrics_url())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(snap["window_samples"], 120);
    assert_eq!(snap["samples"], 0);
    assert!(snap["hops"].as_array().is_some_and(|h| h.is_empty()));
}

#[tokio::test]
async fn metrics_stream_pushes_snapshot_events() {
    let relay = spawn_relay(Vec::new(), None).await;
    relay
        .metrics
        .record(Duration::from_millis(20), 2048, true, 200, None);

    let mut response = reqwest::get(format!("http://{}/proxy/metrics/stream", relay.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Read until the first complete event
    let mut text = String::new();
    while !text.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        text.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    let event = text.split("\n\n").next().unwrap();

    assert!(event.lines().any(|line| line == "event: metrics"));
    let data = event
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let snap: MetricsSnapshot = serde_json::from_str(data).unwrap();
    assert_eq!(snap.window_samples, 120);
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.total_bytes, 2048);
}

#[tokio::test]
async fn token_gate_accepts_header_or_query() {
    let relay = spawn_relay(Vec::new(), Some("secret")).await;
    let client = reqwest::Client::new();

    let denied = client.get(relay.metrics_url()).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(denied.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body: serde_json::Value = denied.json().await.unwrap();
    assert_eq!(body["error"], "invalid token");

    let wrong = client
        .get(relay.metrics_url())
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let bearer = client
        .get(relay.metrics_url())
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(bearer.status(), StatusCode::OK);

    let query = client
        .get(format!("{}?access_token=secret", relay.metrics_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(query.status(), StatusCode::OK);
}

#[tokio::test]
async fn caller_disconnect_closes_upstream_and_records_once() {
    let origin = spawn_origin().await;
    let relay = spawn_relay(Vec::new(), None).await;

    let mut response = reqwest::get(relay.media_url(&origin.url("/endless")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = response.chunk().await.unwrap();
    assert!(first.is_some_and(|c| !c.is_empty()));
    drop(response);

    assert!(
        eventually(|| origin.endless_closed.load(Ordering::SeqCst)).await,
        "upstream body was not closed after the caller left"
    );
    assert!(eventually(|| relay.metrics.snapshot().total_requests == 1).await);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let snap = relay.metrics.snapshot();
    assert_eq!(snap.total_requests, 1);
    assert_eq!(snap.last_status, 200);
    assert!(snap.total_bytes > 0);
    assert!(snap.last_error.is_empty());
}

#[tokio::test]
async fn chained_relays_forward_through_every_hop() {
    let origin = spawn_origin().await;
    let exit = spawn_relay(Vec::new(), Some("exit-token")).await;
    let entry = spawn_relay(
        vec![ChainHop::new(exit.endpoint(), Some("exit-token"))],
        None,
    )
    .await;

    let response = reqwest::get(entry.media_url(&origin.url("/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len(), VIDEO_LEN);

    assert!(eventually(|| entry.metrics.snapshot().total_bytes == VIDEO_LEN as u64).await);
    assert!(eventually(|| exit.metrics.snapshot().total_bytes == VIDEO_LEN as u64).await);
    assert_eq!(exit.metrics.snapshot().total_requests, 1);
}

#[tokio::test]
async fn chain_with_wrong_token_surfaces_hop_rejection() {
    let origin = spawn_origin().await;
    let exit = spawn_relay(Vec::new(), Some("exit-token")).await;
    let entry = spawn_relay(vec![ChainHop::new(exit.endpoint(), Some("stale"))], None).await;

    let response = reqwest::get(entry.media_url(&origin.url("/video")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let _ = response.bytes().await;

    assert!(eventually(|| entry.metrics.snapshot().total_errors == 1).await);
    assert_eq!(exit.metrics.snapshot().total_requests, 0);
}
