use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{error_for_status, http_client, retry_after_header, Backend, BackendReply, Message, MessageRole, TokenUsage};
use crate::config::BackendConfig;
use crate::error::{AdvisorError, BackendError, Result};
use crate::types::{BackendId, BackendKind};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            AdvisorError::BackendSetup(
                "Anthropic API key is required. Set ANTHROPIC_API_KEY or backend.api_key.".to_string(),
            )
        })?;

        let timeout = config.timeout();
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn id(&self) -> BackendId {
        BackendId::new("anthropic", self.model.clone())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, model: &str, messages: &[Message]) -> std::result::Result<BackendReply, BackendError> {
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: messages
                .iter()
                .find(|m| m.role == MessageRole::System)
                .map(|m| m.content.as_str()),
            messages: messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .map(|m| ApiMessage {
                    role: match m.role {
                        MessageRole::Assistant => "assistant",
                        _ => "user",
                    },
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| match BackendError::from(e) {
                BackendError::Timeout(_) => BackendError::Timeout(self.timeout),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &body, retry_after));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        debug!("Anthropic reply: {} chars", text.len());
        Ok(BackendReply {
            text,
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}
