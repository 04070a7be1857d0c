use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::proxy::chain::ChainError;

/// Every way a relay request can end before upstream bytes flow.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("target is required")]
    MissingTarget,
    #[error("invalid target url")]
    InvalidTarget,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("invalid token")]
    Unauthorized,
    #[error("proxy request build failed: {0}")]
    RequestBuild(String),
    #[error("proxy request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingTarget | Self::InvalidTarget | Self::Chain(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RequestBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error":  self.to_string(),
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
