use axum::http::{header, HeaderMap, HeaderValue};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Path every relay node serves media on.
pub const RELAY_PATH: &str = "/proxy/media";

/// Path every relay node serves its metrics snapshot on.
pub const METRICS_PATH: &str = "/proxy/metrics";

/// One relay node in the forwarding chain, in the order it is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainHop {
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl ChainHop {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: auth_token.map(str::to_owned),
        }
    }

    /// Endpoint with surrounding whitespace and trailing slashes removed.
    /// Empty when the hop should be skipped.
    pub fn base(&self) -> &str {
        self.endpoint.trim().trim_end_matches('/')
    }

    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("invalid chain endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Where the relay must send the outbound request, and what extra headers
/// to attach to it.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub url: String,
    pub headers: HeaderMap,
}

/// Wraps `original` through every hop so that the first configured hop
/// receives a URL which, once its own layer is stripped, names the next hop.
///
/// Construction runs from the last hop (closest to the origin) outward.
/// The first hop's token travels both as `access_token` and as a bearer header.
pub fn resolve(original: &str, hops: &[ChainHop]) -> Result<ResolvedTarget, ChainError> {
    let mut headers = HeaderMap::new();
    if hops.is_empty() {
        return Ok(ResolvedTarget {
            url: original.to_owned(),
            headers,
        });
    }

    let mut current = original.to_owned();
    for (index, hop) in hops.iter().enumerate().rev() {
        let base = hop.base();
        if base.is_empty() {
            continue;
        }

        let mut wrapped = Url::parse(&format!("{base}{RELAY_PATH}"))
            .map_err(|_| ChainError::InvalidEndpoint(hop.endpoint.clone()))?;
        {
            let mut query = wrapped.query_pairs_mut();
            query.append_pair("target", &current);
            if let Some(token) = hop.token() {
                query.append_pair("access_token", token);
            }
        }
        current = wrapped.into();

        if index == 0 {
            if let Some(token) = hop.token() {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| ChainError::InvalidEndpoint(hop.endpoint.clone()))?;
                headers.insert(header::AUTHORIZATION, value);
            }
        }
    }

    Ok(ResolvedTarget {
        url: current,
        headers,
    })
}
