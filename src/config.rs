use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROXY_PORT: u16 = 8080;
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/api/chat";
pub const DEFAULT_MODEL: &str = "qwen2:1.5b";
pub const DEFAULT_HISTORY_WINDOW: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 180;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a personal assistant running inside OpenClaw. Use short answers";

pub const DEFAULT_TOOLING_PROMPT: &str = "Tools available for this request:
- read: Read file contents
- write: Create or overwrite files
- exec: Run shell commands (PTY available)
- web_search: Search the web (Brave API)
- canvas: Present/eval/snapshot the Canvas";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {key} file {path:?}: {source}")]
    PromptFile {
        key: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings the request normalizer needs. Kept apart from the server settings
/// so translation can be exercised without a full config.
#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub default_model: String,
    pub history_window: usize,
    pub system_prompt: String,
    pub tooling_prompt: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tooling_prompt: DEFAULT_TOOLING_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub bind_host: String,
    pub proxy_port: u16,
    pub backend_url: String,
    pub request_timeout: Duration,
    pub translation: TranslationSettings,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            proxy_port: DEFAULT_PROXY_PORT,
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            translation: TranslationSettings::default(),
        }
    }
}

impl AdapterConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_host = lookup("BIND_HOST").unwrap_or(defaults.bind_host);
        let proxy_port = parse_var(&lookup, "PROXY_PORT", defaults.proxy_port)?;

        let backend_url = lookup("BACKEND_URL").unwrap_or(defaults.backend_url);
        if let Err(e) = reqwest::Url::parse(&backend_url) {
            return Err(ConfigError::Invalid {
                key: "BACKEND_URL",
                value: backend_url,
                reason: e.to_string(),
            });
        }

        let timeout_seconds = parse_var(
            &lookup,
            "REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;
        if timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECONDS",
                value: timeout_seconds.to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        let history_window = parse_var(&lookup, "HISTORY_WINDOW", DEFAULT_HISTORY_WINDOW)?;
        if history_window == 0 {
            return Err(ConfigError::Invalid {
                key: "HISTORY_WINDOW",
                value: history_window.to_string(),
                reason: "must keep at least 1 message".to_string(),
            });
        }

        let translation = TranslationSettings {
            default_model: lookup("DEFAULT_MODEL").unwrap_or(defaults.translation.default_model),
            history_window,
            system_prompt: prompt_var(
                &lookup,
                "SYSTEM_PROMPT",
                "SYSTEM_PROMPT_FILE",
                defaults.translation.system_prompt,
            )?,
            tooling_prompt: prompt_var(
                &lookup,
                "TOOLING_PROMPT",
                "TOOLING_PROMPT_FILE",
                defaults.translation.tooling_prompt,
            )?,
        };

        Ok(Self {
            bind_host,
            proxy_port,
            backend_url,
            request_timeout: Duration::from_secs(timeout_seconds),
            translation,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.proxy_port)
    }

    pub fn log_summary(&self) {
        info!("Listening on: {}", self.bind_addr());
        info!("Forwarding chat to: {}", self.backend_url);
        info!("Translation config:");
        info!("  Default model: {}", self.translation.default_model);
        info!("  History window: {} message(s)", self.translation.history_window);
        info!("  System prompt: {} chars", self.translation.system_prompt.len());
        info!("  Tooling prompt: {} chars", self.translation.tooling_prompt.len());
        info!("  Request timeout: {} seconds", self.request_timeout.as_secs());
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Inline text wins over the file variant.
fn prompt_var<F>(
    lookup: &F,
    key: &'static str,
    file_key: &'static str,
    default: String,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(text) = lookup(key) {
        return Ok(text);
    }

    match lookup(file_key) {
        Some(path) => {
            let path = PathBuf::from(path);
            fs::read_to_string(&path)
                .map(|text| text.trim_end().to_string())
                .map_err(|source| ConfigError::PromptFile {
                    key: file_key,
                    path,
                    source,
                })
        }
        None => Ok(default),
    }
}
