//! Text-generation backends.
//!
//! Every provider sits behind [`Backend`]; the pipeline never branches on
//! provider names. Adapters translate transport failures into the shared
//! [`BackendError`] taxonomy so retry decisions stay provider-agnostic.

pub mod anthropic;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{AdvisorError, BackendError, Result};
use crate::types::{BackendId, BackendKind};

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    fn kind(&self) -> BackendKind;

    /// Upper bound for a single `send`, enforced by the caller.
    fn timeout(&self) -> Duration;

    async fn send(&self, model: &str, messages: &[Message]) -> std::result::Result<BackendReply, BackendError>;
}

/// Build the adapter named by `config.provider`.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicBackend::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(config)?)),
        other => Err(AdvisorError::BackendSetup(format!(
            "unsupported provider '{}' (expected 'anthropic' or 'ollama')",
            other
        ))),
    }
}

/// Shared HTTP client construction for the adapters.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("codeadvisor/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AdvisorError::BackendSetup(format!("failed to create HTTP client: {}", e)))
}

/// Map a non-success HTTP response onto the error taxonomy.
pub(crate) fn error_for_status(
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> BackendError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    let lower = body.to_lowercase();
    match status.as_u16() {
        401 | 403 => BackendError::Auth(message),
        402 => BackendError::Quota(message),
        413 => BackendError::PayloadTooLarge(message),
        429 => BackendError::RateLimited { message, retry_after },
        400 if lower.contains("credit balance") || lower.contains("quota") => BackendError::Quota(message),
        400 if lower.contains("too long") || lower.contains("context length") || lower.contains("maximum context") => {
            BackendError::TokenLimit(message)
        }
        408 => BackendError::Timeout(Duration::ZERO),
        500..=599 => BackendError::Network(message),
        _ => BackendError::Other(message),
    }
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_error_for_status() {
        let check = |code: u16, body: &str| error_for_status(StatusCode::from_u16(code).unwrap(), body, None);
        assert!(matches!(check(401, "invalid x-api-key"), BackendError::Auth(_)));
        assert!(matches!(check(403, "forbidden"), BackendError::Auth(_)));
        assert!(matches!(check(402, ""), BackendError::Quota(_)));
        assert!(matches!(check(400, "Your credit balance is too low"), BackendError::Quota(_)));
        assert!(matches!(check(413, "request too large"), BackendError::PayloadTooLarge(_)));
        assert!(matches!(check(429, "slow down"), BackendError::RateLimited { .. }));
        assert!(matches!(check(400, "prompt is too long: 210000 tokens"), BackendError::TokenLimit(_)));
        assert!(matches!(check(400, "bad field"), BackendError::Other(_)));
        assert!(matches!(check(529, "overloaded"), BackendError::Network(_)));
        assert!(matches!(check(503, ""), BackendError::Network(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_create_backend_by_provider() {
        let ollama = BackendConfig {
            provider: "ollama".to_string(),
            ..BackendConfig::default()
        };
        let backend = create_backend(&ollama).unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
        assert_eq!(backend.id().provider, "ollama");

        let anthropic = BackendConfig {
            api_key: Some("sk-test".to_string()),
            ..BackendConfig::default()
        };
        let backend = create_backend(&anthropic).unwrap();
        assert_eq!(backend.kind(), BackendKind::Remote);
        assert_eq!(backend.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_create_backend_unknown_provider() {
        let config = BackendConfig {
            provider: "carrier-pigeon".to_string(),
            ..BackendConfig::default()
        };
        assert!(matches!(create_backend(&config), Err(AdvisorError::BackendSetup(_))));
    }

    #[tokio::test]
    async fn test_mock_backend() {
        let mut mock = MockBackend::new();
        mock.expect_send().times(1).returning(|_, _| {
            Ok(BackendReply {
                text: "[]".to_string(),
                usage: None,
            })
        });
        let reply = mock.send("m", &[Message::user("hi")]).await.unwrap();
        assert_eq!(reply.text, "[]");
    }
}
