use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

const ALLOW_METHODS: &str = "GET,HEAD,OPTIONS";
const ALLOW_HEADERS: &str = "*";

/// Lets cross-origin players issue range requests.
///
/// Applied to every response, errors and rejections included. The caller's
/// `Origin` is echoed back (`*` when absent) and overrides whatever CORS
/// headers an upstream sent.
pub async fn cors_headers(req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or(HeaderValue::from_static("*"));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );

    let varies_on_origin = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("origin"));
    if !varies_on_origin {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    response
}
