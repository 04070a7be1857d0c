use axum::{
    extract::{Request, State},
    http::{header, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::ProxyError;
use crate::AppState;

/// Query parameter a relay hop can use instead of the bearer header.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Token gate in front of every route when a token is configured.
///
/// Accepts `Authorization: Bearer <token>` or `?access_token=<token>`. A
/// matching query token is stripped before the request reaches handlers.
/// Pre-flight `OPTIONS` requests pass untouched.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let header_ok = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);

    let query_ok = query_token(req.uri()).is_some_and(|token| token.trim() == expected);

    if !header_ok && !query_ok {
        return ProxyError::Unauthorized.into_response();
    }

    if query_ok {
        if let Some(uri) = without_access_token(req.uri()) {
            *req.uri_mut() = uri;
        }
    }
    next.run(req).await
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == ACCESS_TOKEN_PARAM)
        .map(|(_, v)| v.into_owned())
}

/// Same URI with every `access_token` pair removed from the query.
fn without_access_token(uri: &Uri) -> Option<Uri> {
    let query = uri.query()?;
    let kept: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k != ACCESS_TOKEN_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut path_and_query = uri.path().to_owned();
    if !kept.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        path_and_query.push('?');
        path_and_query.push_str(&encoded);
    }

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    Uri::from_parts(parts).ok()
}
