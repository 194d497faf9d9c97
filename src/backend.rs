use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::AdapterError;
use crate::translator::{BackendStreamEvent, OllamaChatRequest};

/// HTTP client for the single Ollama chat endpoint.
///
/// The timeout bounds the whole exchange, so for streamed replies it covers
/// every line read, not each line individually. Nothing here retries.
#[derive(Clone)]
pub struct BackendClient {
    chat_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(chat_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            chat_url: chat_url.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
            timeout,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    async fn send(&self, request: &OllamaChatRequest) -> Result<reqwest::Response, AdapterError> {
        info!(
            "🚀 Sending chat request to Ollama: {} (timeout: {}s)",
            self.chat_url,
            self.timeout.as_secs()
        );
        debug!(
            "📤 Backend request: {}",
            serde_json::to_string_pretty(request).unwrap_or_default()
        );

        let response = self.client.post(&self.chat_url).json(request).send().await?;

        let status = response.status();
        info!("📬 Ollama chat response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AdapterError::BackendBadResponse(format!(
                "backend returned {}: {}",
                status,
                error_text.trim()
            )));
        }

        Ok(response)
    }

    /// Unary call: one request, one complete JSON body
    pub async fn chat(&self, request: &OllamaChatRequest) -> Result<Value, AdapterError> {
        let response = self.send(request).await?;
        let response_bytes = response.bytes().await?;

        let ollama_resp: Value = serde_json::from_slice(&response_bytes).map_err(|e| {
            AdapterError::BackendBadResponse(format!("invalid JSON body: {}", e))
        })?;

        debug!(
            "📥 Ollama chat response: {}",
            serde_json::to_string_pretty(&ollama_resp).unwrap_or_default()
        );
        Ok(ollama_resp)
    }

    /// Streaming call. Resolves once response headers arrive; the body is
    /// then pulled lazily, one parsed line at a time.
    pub async fn chat_stream(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<impl Stream<Item = EventResult> + Send + 'static, AdapterError> {
        let response = self.send(request).await?;
        info!("🌊 Ollama stream opened");
        Ok(ndjson_events(Box::pin(response.bytes_stream())))
    }
}

pub type EventResult = Result<BackendStreamEvent, AdapterError>;

/// Longest backend line accepted before the stream is treated as broken
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into newline-terminated lines without buffering past
/// the current line.
struct LineReader<S> {
    body: S,
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline
    scanned: usize,
    max_line_bytes: usize,
    exhausted: bool,
}

impl<S, E> LineReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<AdapterError>,
{
    fn new(body: S, max_line_bytes: usize) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes,
            exhausted: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>, AdapterError> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let newline_pos = self.scanned + offset;
                let line_bytes = self.buffer.drain(..=newline_pos).collect::<Vec<u8>>();
                self.scanned = 0;
                return decode_line(&line_bytes[..newline_pos]).map(Some);
            }
            self.scanned = self.buffer.len();

            if self.buffer.len() > self.max_line_bytes {
                return Err(AdapterError::BackendBadResponse(format!(
                    "stream line exceeds {} bytes",
                    self.max_line_bytes
                )));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // Final line without a trailing newline
                self.scanned = 0;
                let rest = std::mem::take(&mut self.buffer);
                return decode_line(&rest).map(Some);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    debug!("📦 Stream chunk received: {} bytes", chunk.len());
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => return Err(e.into()),
                None => self.exhausted = true,
            }
        }
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, AdapterError> {
    let line = std::str::from_utf8(bytes).map_err(|e| {
        AdapterError::BackendBadResponse(format!("stream line is not UTF-8: {}", e))
    })?;
    Ok(line.strip_suffix('\r').unwrap_or(line).to_string())
}

/// Turn an NDJSON byte stream into parsed backend events.
///
/// Blank lines are skipped. After the first error the stream ends.
pub fn ndjson_events<S, E>(body: S) -> impl Stream<Item = EventResult>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<AdapterError>,
{
    ndjson_events_with_limit(body, MAX_LINE_BYTES)
}

fn ndjson_events_with_limit<S, E>(
    body: S,
    max_line_bytes: usize,
) -> impl Stream<Item = EventResult>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<AdapterError>,
{
    let reader = LineReader::new(body, max_line_bytes);

    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!("✉️  Stream line: {}", line);
                    let event = BackendStreamEvent::from_line(&line);
                    let next = if event.is_ok() { Some(reader) } else { None };
                    return Some((event, next));
                }
                Ok(None) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Bytes, AdapterError>> + Unpin {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect_events(
        chunks: Vec<&'static str>,
    ) -> Vec<Result<BackendStreamEvent, AdapterError>> {
        ndjson_events(byte_stream(chunks)).collect().await
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let events = collect_events(vec![
            "{\"message\":{\"content\":\"Hel",
            "lo\"},\"done\":false}\n{\"message\":{\"content\":\" world\"},",
            "\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ])
        .await;

        let events: Vec<BackendStreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content, "Hello");
        assert_eq!(events[1].content, " world");
        assert!(events[2].done);
    }

    #[tokio::test]
    async fn test_blank_lines_and_crlf_are_tolerated() {
        let events = collect_events(vec![
            "\n\r\n{\"message\":{\"content\":\"A\"},\"done\":false}\r\n\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}",
        ])
        .await;

        let events: Vec<BackendStreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content, "A");
        assert!(events[1].done);
    }

    #[tokio::test]
    async fn test_malformed_line_ends_stream() {
        let events = collect_events(vec![
            "{\"message\":{\"content\":\"A\"},\"done\":false}\n",
            "garbage\n",
            "{\"message\":{\"content\":\"B\"},\"done\":false}\n",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(AdapterError::BackendBadResponse(_))));
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"A\"},\"done\":false}\n")),
            Err(AdapterError::BackendTimeout("operation timed out".to_string())),
        ]);

        let events: Vec<_> = ndjson_events(body).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(AdapterError::BackendTimeout(_))));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let body = byte_stream(vec!["{\"message\":", "{\"content\":\"", "xxxxxxxxxxxxxxxx"]);

        let events: Vec<_> = ndjson_events_with_limit(body, 16).collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(AdapterError::BackendBadResponse(msg)) => {
                assert!(msg.contains("exceeds 16 bytes"))
            }
            other => panic!("expected BackendBadResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        // 16 bytes of JSON, newline in a later chunk
        let body = byte_stream(vec!["{\"done\":   true}", "\n"]);

        let events: Vec<_> = ndjson_events_with_limit(body, 16).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_many_small_chunks_form_one_line() {
        let mut chunks = vec!["{\"message\":{\"content\":\""];
        chunks.extend(std::iter::repeat("ab").take(500));
        chunks.push("\"},\"done\":true}\n");

        let events = collect_events(chunks).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.content.len(), 1000);
        assert!(event.done);
    }

    #[tokio::test]
    async fn test_empty_body_yields_nothing() {
        let events = collect_events(vec![]).await;
        assert!(events.is_empty());
    }
}
