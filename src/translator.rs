use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::TranslationSettings;
use crate::error::AdapterError;

/// Normalized chat message, shared by both wire formats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// OpenAI chat completions request format
#[derive(Debug, Deserialize)]
pub struct OpenAIChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<OpenAIInboundMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub use_tools: Option<bool>,
}

/// Inbound message before normalization. `content` may be a string, a list
/// of typed parts, or anything else a client decides to send.
#[derive(Debug, Deserialize)]
pub struct OpenAIInboundMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Value,
}

/// Ollama native chat request format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// One line of an Ollama chat stream, or the whole unary reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendStreamEvent {
    pub content: String,
    pub done: bool,
}

impl BackendStreamEvent {
    /// Missing or oddly-shaped fields fall back to empty content / not done.
    pub fn from_value(value: &Value) -> Self {
        Self {
            content: extract_message_content(value),
            done: value.get("done").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    pub fn from_line(line: &str) -> Result<Self, AdapterError> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            AdapterError::BackendBadResponse(format!("invalid stream line {:?}: {}", line, e))
        })?;
        Ok(Self::from_value(&value))
    }
}

/// OpenAI chat completion (non-streaming) response format
#[derive(Debug, Serialize)]
pub struct OpenAIChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAICompletionChoice>,
}

#[derive(Debug, Serialize)]
pub struct OpenAICompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Translated request plus what the response side needs to echo back
#[derive(Debug, Clone)]
pub struct ChatTranslation {
    pub model: String,
    pub stream: bool,
    pub backend_request: OllamaChatRequest,
}

/// Build the synthesized system message, appending the tooling block on request
pub fn build_system_message(use_tools: bool, settings: &TranslationSettings) -> ChatMessage {
    let mut content = settings.system_prompt.clone();
    if use_tools {
        content.push('\n');
        content.push_str(&settings.tooling_prompt);
    }
    ChatMessage::new("system", content)
}

/// Flatten inbound content to a plain string.
///
/// Lists keep only `{"type": "text"}` parts, joined with a single space.
pub fn normalize_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(parts) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .map(|part| part.get("text").and_then(Value::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

pub fn normalize_messages(messages: &[OpenAIInboundMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| ChatMessage {
            role: msg.role.clone().unwrap_or_else(|| "user".to_string()),
            content: normalize_content(&msg.content),
        })
        .collect()
}

/// Keep only the most recent `window` messages, in original order
pub fn recent_history(mut messages: Vec<ChatMessage>, window: usize) -> Vec<ChatMessage> {
    if messages.len() > window {
        let excess = messages.len() - window;
        messages.drain(..excess);
    }
    messages
}

/// Translate an OpenAI chat request to the Ollama native format
pub fn translate_openai_chat_to_ollama(
    openai_req: Value,
    settings: &TranslationSettings,
) -> Result<ChatTranslation, AdapterError> {
    let req: OpenAIChatRequest = serde_json::from_value(openai_req)
        .map_err(|e| AdapterError::RequestMalformed(e.to_string()))?;

    let model = req.model.unwrap_or_else(|| settings.default_model.clone());
    let stream = req.stream.unwrap_or(false);
    let use_tools = req.use_tools.unwrap_or(false);
    let normalized = normalize_messages(&req.messages);
    let total = normalized.len();
    let history = recent_history(normalized, settings.history_window);

    info!("🔄 Translating OpenAI chat request to Ollama native API");
    info!("   Model: {}", model);
    info!("   Messages: {} received, {} forwarded", total, history.len());
    info!("   Stream: {}, tools: {}", stream, use_tools);

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(build_system_message(use_tools, settings));
    messages.extend(history);

    Ok(ChatTranslation {
        model: model.clone(),
        stream,
        backend_request: OllamaChatRequest {
            model,
            messages,
            stream,
        },
    })
}

/// Pull `message.content` out of an Ollama reply, empty when absent
pub fn extract_message_content(value: &Value) -> String {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Translate an Ollama native chat reply to the OpenAI format
pub fn translate_ollama_chat_to_openai(
    ollama_resp: &Value,
    model: String,
    id: String,
    created: i64,
) -> OpenAIChatCompletion {
    let content = extract_message_content(ollama_resp);

    debug!("🔄 Translating Ollama chat response to OpenAI format");
    debug!("   Content length: {}", content.len());

    OpenAIChatCompletion {
        id,
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![OpenAICompletionChoice {
            index: 0,
            message: ChatMessage::new("assistant", content),
            finish_reason: "stop".to_string(),
        }],
    }
}

/// Fresh `chatcmpl-` id for a response
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
