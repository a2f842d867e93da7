use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{error_for_status, http_client, retry_after_header, Backend, BackendReply, Message, TokenUsage};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::types::{BackendId, BackendKind};

const OLLAMA_API_BASE: &str = "http://localhost:11434";

/// Local Ollama server, non-streaming `/api/chat`.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_predict: u32,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    format: &'static str,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let timeout = config.timeout();
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model(),
            temperature: config.temperature,
            num_predict: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn id(&self) -> BackendId {
        BackendId::new("ollama", self.model.clone())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(&self, model: &str, messages: &[Message]) -> std::result::Result<BackendReply, BackendError> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
            format: "json",
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
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

        let parsed: ChatResponse = response.json().await?;
        debug!("Ollama reply: {} chars", parsed.message.content.len());

        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(input_tokens), Some(output_tokens)) => Some(TokenUsage {
                input_tokens,
                output_tokens,
            }),
            _ => None,
        };
        Ok(BackendReply {
            text: parsed.message.content,
            usage,
        })
    }
}
