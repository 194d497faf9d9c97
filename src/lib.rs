//! OpenAI-compatible chat completions in front of an Ollama-style chat backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod proxy;
pub mod streaming;
pub mod translator;
