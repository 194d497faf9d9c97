use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use http_body_util::{BodyExt, Limited};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::backend::BackendClient;
use crate::config::{AdapterConfig, TranslationSettings};
use crate::error::AdapterError;
use crate::streaming::{forward_events, SseTranscoder};
use crate::translator::{
    completion_id, translate_ollama_chat_to_openai, translate_openai_chat_to_ollama,
    ChatTranslation,
};

/// Path aliases that all reach the same chat handler
pub const CHAT_COMPLETION_ROUTES: [&str; 3] = [
    "/chat/completions",
    "/v1/chat/completions",
    "/api/chat/completions",
];

/// Capacity of the per-stream frame channel
const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Largest inbound request body read into memory
pub const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AdapterState {
    pub backend: BackendClient,
    pub translation: Arc<TranslationSettings>,
}

impl AdapterState {
    pub fn new(config: &AdapterConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            backend: BackendClient::new(config.backend_url.clone(), config.request_timeout)?,
            translation: Arc::new(config.translation.clone()),
        })
    }
}

/// Routing table: every alias registered explicitly against one handler
pub fn router(state: AdapterState) -> Router {
    CHAT_COMPLETION_ROUTES
        .iter()
        .fold(Router::new(), |router, path| {
            router.route(path, post(chat_completions_handler))
        })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn chat_completions_handler(
    State(state): State<AdapterState>,
    req: Request<Body>,
) -> Result<Response, AdapterError> {
    info!("📨 Incoming request: {} {}", req.method(), req.uri().path());

    let body_bytes = Limited::new(req.into_body(), MAX_REQUEST_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| AdapterError::RequestMalformed(format!("failed to read body: {}", e)))?
        .to_bytes();

    let body_json: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| AdapterError::RequestMalformed(format!("invalid JSON body: {}", e)))?;
    debug!(
        "📋 OpenAI request body: {}",
        serde_json::to_string_pretty(&body_json).unwrap_or_default()
    );

    let translation = translate_openai_chat_to_ollama(body_json, &state.translation)?;

    if translation.stream {
        stream_chat_completion(state, translation).await
    } else {
        unary_chat_completion(state, translation).await
    }
}

async fn unary_chat_completion(
    state: AdapterState,
    translation: ChatTranslation,
) -> Result<Response, AdapterError> {
    info!("📦 Non-streaming request - will buffer full response");

    let ollama_resp = state.backend.chat(&translation.backend_request).await?;
    let openai_resp = translate_ollama_chat_to_openai(
        &ollama_resp,
        translation.model,
        completion_id(),
        chrono::Utc::now().timestamp(),
    );

    info!("✅ Translated chat response back to OpenAI format");
    Ok((StatusCode::OK, Json(openai_resp)).into_response())
}

async fn stream_chat_completion(
    state: AdapterState,
    translation: ChatTranslation,
) -> Result<Response, AdapterError> {
    info!("🌊 Streaming request - will transcode NDJSON to SSE in real-time");

    // Connect before committing to a 200 so connection failures stay HTTP 500s
    let events = state
        .backend
        .chat_stream(&translation.backend_request)
        .await?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(
        STREAM_CHANNEL_CAPACITY,
    );
    let transcoder = SseTranscoder::new(translation.model);

    tokio::spawn(async move {
        match forward_events(events, transcoder, tx).await {
            Ok(_) => {}
            Err(AdapterError::ClientDisconnected) => {
                warn!("⚠️  Client disconnected, backend stream dropped");
            }
            Err(e) => {
                error!("❌ Streaming task failed [{}]: {}", e.kind(), e);
            }
        }
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    fn test_state() -> AdapterState {
        // Nothing listens on port 9; requests that get past parsing fail to connect
        let config = AdapterConfig {
            backend_url: "http://127.0.0.1:9/api/chat".to_string(),
            ..AdapterConfig::default()
        };
        AdapterState::new(&config).unwrap()
    }

    fn post_json(path: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_json_is_500() {
        for path in CHAT_COMPLETION_ROUTES {
            let resp = router(test_state())
                .oneshot(post_json(path, "{not json"))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn test_missing_messages_is_500() {
        let resp = router(test_state())
            .oneshot(post_json("/v1/chat/completions", r#"{"model":"qwen2:1.5b"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_get_is_not_routed() {
        let req = Request::builder()
            .method("GET")
            .uri("/v1/chat/completions")
            .body(Body::empty())
            .unwrap();
        let resp = router(test_state()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_oversized_body_is_500() {
        let padding = "x".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let body = format!(r#"{{"messages":[{{"content":"{}"}}]}}"#, padding);
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("Content-Type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let resp = router(test_state()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["error"].as_str().unwrap().contains("failed to read body"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let resp = router(test_state())
            .oneshot(post_json("/v1/embeddings", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
