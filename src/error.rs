use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure kinds of a single chat request.
///
/// Every kind collapses to the same HTTP 500 at the wire boundary, but the
/// variants stay distinct so logs and tests can tell them apart.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed request: {0}")]
    RequestMalformed(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("backend timed out: {0}")]
    BackendTimeout(String),

    #[error("bad backend response: {0}")]
    BackendBadResponse(String),

    #[error("failed to encode response: {0}")]
    Encode(String),

    /// The client went away mid-stream. Only ever logged.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl AdapterError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::RequestMalformed(_) => "request_malformed",
            AdapterError::BackendUnreachable(_) => "backend_unreachable",
            AdapterError::BackendTimeout(_) => "backend_timeout",
            AdapterError::BackendBadResponse(_) => "backend_bad_response",
            AdapterError::Encode(_) => "encode",
            AdapterError::ClientDisconnected => "client_disconnected",
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::BackendTimeout(e.to_string())
        } else if e.is_connect() {
            AdapterError::BackendUnreachable(e.to_string())
        } else if e.is_body() || e.is_decode() {
            AdapterError::BackendBadResponse(e.to_string())
        } else {
            AdapterError::BackendUnreachable(e.to_string())
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        error!("❌ Chat request failed [{}]: {}", self.kind(), self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    #[tokio::test]
    async fn test_every_kind_collapses_to_500_json() {
        let errors = vec![
            AdapterError::RequestMalformed("missing field `messages`".to_string()),
            AdapterError::BackendUnreachable("connection refused".to_string()),
            AdapterError::BackendTimeout("operation timed out".to_string()),
            AdapterError::BackendBadResponse("expected value".to_string()),
        ];

        for err in errors {
            let message = err.to_string();
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"], message);
        }
    }

    #[test]
    fn test_kinds_are_distinct() {
        assert_eq!(AdapterError::RequestMalformed(String::new()).kind(), "request_malformed");
        assert_eq!(AdapterError::BackendTimeout(String::new()).kind(), "backend_timeout");
        assert_ne!(
            AdapterError::BackendUnreachable(String::new()).kind(),
            AdapterError::BackendBadResponse(String::new()).kind()
        );
    }
}
