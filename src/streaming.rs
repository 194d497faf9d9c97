//! OpenAI-style SSE transcoding of an Ollama chat stream.
//!
//! Frame order for one response:
//!
//! 1. one metadata chunk (`delta.role = "assistant"`, empty content)
//! 2. one content chunk per non-empty backend line
//! 3. one stop chunk (`finish_reason = "stop"`) when a line says `done`
//! 4. `data: [DONE]`
//!
//! A failure after the first frame replaces 2-3 with a single error frame,
//! and `[DONE]` still follows.

use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::AdapterError;
use crate::translator::{completion_id, BackendStreamEvent};

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Serialize)]
pub struct OpenAIChatChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAIChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct OpenAIChunkChoice {
    pub index: u32,
    pub delta: OpenAIChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenAIChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub content: String,
}

/// Frame a payload as one SSE `data:` event
pub fn sse_frame<T: Serialize>(payload: &T) -> Result<Bytes, AdapterError> {
    let json = serde_json::to_string(payload).map_err(|e| AdapterError::Encode(e.to_string()))?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Open,
    Stopped,
    Closed,
}

/// Per-response state machine. One id and timestamp are shared by every chunk.
pub struct SseTranscoder {
    id: String,
    created: i64,
    model: String,
    state: StreamState,
}

impl SseTranscoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            state: StreamState::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn chunk(
        &self,
        role: Option<&str>,
        content: &str,
        finish_reason: Option<&str>,
    ) -> OpenAIChatChunk {
        OpenAIChatChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAIChunkChoice {
                index: 0,
                delta: OpenAIChunkDelta {
                    role: role.map(str::to_string),
                    content: content.to_string(),
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    /// Metadata chunk that opens the assistant message on the client
    pub fn open(&mut self) -> Result<Bytes, AdapterError> {
        self.state = StreamState::Open;
        sse_frame(&self.chunk(Some("assistant"), "", None))
    }

    /// Frames for one backend line: a content chunk if it carries text, then
    /// a stop chunk if it is the final line. Both may fire for the same line.
    pub fn on_event(&mut self, event: &BackendStreamEvent) -> Result<Vec<Bytes>, AdapterError> {
        let mut frames = Vec::with_capacity(2);
        if self.state != StreamState::Open {
            return Ok(frames);
        }

        if !event.content.is_empty() {
            frames.push(sse_frame(&self.chunk(None, &event.content, None))?);
        }
        if event.done {
            frames.push(sse_frame(&self.chunk(None, "", Some("stop")))?);
            self.state = StreamState::Stopped;
        }
        Ok(frames)
    }

    /// Best-effort error frame for a failure after headers went out
    pub fn fail(&mut self, err: &AdapterError) -> Bytes {
        self.state = StreamState::Stopped;
        let payload = json!({
            "error": {
                "message": err.to_string(),
                "type": err.kind(),
            }
        });
        Bytes::from(format!("data: {}\n\n", payload))
    }

    pub fn finish(&mut self) -> Bytes {
        self.state = StreamState::Closed;
        Bytes::from_static(DONE_FRAME.as_bytes())
    }

    pub fn is_stopped(&self) -> bool {
        self.state == StreamState::Stopped
    }
}

/// Counters reported when a stream completes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub lines: usize,
    pub frames: usize,
    pub content_bytes: usize,
}

async fn send_frame(
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    frame: Bytes,
    summary: &mut StreamSummary,
) -> Result<(), AdapterError> {
    tx.send(Ok(frame))
        .await
        .map_err(|_| AdapterError::ClientDisconnected)?;
    summary.frames += 1;
    Ok(())
}

/// Pump backend events through the transcoder into the client body channel.
///
/// Returns as soon as the receiver is dropped, even while waiting on the
/// backend, so the backend stream (and its connection) is dropped with it.
pub async fn forward_events<S>(
    events: S,
    mut transcoder: SseTranscoder,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> Result<StreamSummary, AdapterError>
where
    S: Stream<Item = Result<BackendStreamEvent, AdapterError>>,
{
    futures::pin_mut!(events);
    let start_time = Instant::now();
    let mut summary = StreamSummary::default();

    send_frame(&tx, transcoder.open()?, &mut summary).await?;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => return Err(AdapterError::ClientDisconnected),
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                error!(
                    "❌ Stream failed after {} line(s) [{}]: {}",
                    summary.lines,
                    e.kind(),
                    e
                );
                send_frame(&tx, transcoder.fail(&e), &mut summary).await?;
                send_frame(&tx, transcoder.finish(), &mut summary).await?;
                return Err(e);
            }
            None => break,
        };

        summary.lines += 1;
        summary.content_bytes += event.content.len();
        debug!(
            "✉️  Line #{}: {} bytes, done={}",
            summary.lines,
            event.content.len(),
            event.done
        );

        for frame in transcoder.on_event(&event)? {
            send_frame(&tx, frame, &mut summary).await?;
        }
        if transcoder.is_stopped() {
            break;
        }
    }

    send_frame(&tx, transcoder.finish(), &mut summary).await?;

    info!(
        "✅ Stream {} completed: {} line(s), {} frame(s), {} content bytes in {:?}",
        transcoder.id(),
        summary.lines,
        summary.frames,
        summary.content_bytes,
        start_time.elapsed()
    );
    Ok(summary)
}
