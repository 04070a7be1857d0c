use axum::http::{HeaderMap, HeaderName};

/// Caller headers copied onto the outbound request. Anything else is dropped.
pub const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "range",
    "user-agent",
    "accept",
    "accept-language",
    "accept-encoding",
    "origin",
    "referer",
    "authorization",
    "cookie",
    "if-none-match",
    "if-modified-since",
    "if-range",
    "cache-control",
    "pragma",
    "x-requested-with",
    "x-custom-signature",
    "x-forwarded-for",
    "x-forwarded-proto",
];

/// Meaningful only between adjacent connection endpoints.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Builds the outbound header set: chain headers first, then the allow-listed
/// caller headers on top, minus hop-by-hop entries.
///
/// A caller `Authorization` replaces the chain bearer; the first hop still
/// authenticates through its `access_token` query parameter.
pub fn outbound_request_headers(inbound: &HeaderMap, chain: &HeaderMap) -> HeaderMap {
    let mut out = chain.clone();
    for &name in FORWARDED_REQUEST_HEADERS {
        let name = HeaderName::from_static(name);
        if let Some(value) = inbound.get(&name).filter(|v| !v.is_empty()) {
            out.insert(name, value.clone());
        }
    }
    strip_hop_by_hop(&mut out);
    out
}

/// Upstream response headers minus hop-by-hop entries. Repeated headers
/// (e.g. `Set-Cookie`) are kept.
pub fn relayed_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for &name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
