//! Chat model access.
//!
//! Both the hosted OpenAI API and local models (served behind an
//! OpenAI-compatible proxy such as LiteLLM in front of Ollama) speak the
//! same `POST {base}/chat/completions` protocol, so one client covers both.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::embedding::{http_client, post_json_with_retry, DEFAULT_OPENAI_BASE};

/// Sent as the bearer token to local proxies when no key is configured.
const LOCAL_PLACEHOLDER_KEY: &str = "sk-local";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one system + user exchange and return the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ if config.is_local() => LOCAL_PLACEHOLDER_KEY.to_string(),
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let base_url = match (&config.base_url, config.is_local()) {
            (Some(url), _) => url.clone(),
            (None, false) => DEFAULT_OPENAI_BASE.to_string(),
            (None, true) => bail!("llm.base_url must be set when llm.provider is 'local'"),
        };

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let start = Instant::now();

        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user.to_string(),
        });

        let body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        })?;

        debug!(model = %self.model, base_url = %self.base_url, "sending chat request");

        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "Chat",
        )
        .await?;

        let response: ChatResponse =
            serde_json::from_value(json).context("Failed to parse chat completion response")?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("Chat completion returned no choices"))?;

        debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "chat request finished"
        );
        Ok(content)
    }
}

/// Build the chat model described by `config`.
pub fn create_chat(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" | "local" => {
            let chat = OpenAiChat::new(config)?;
            info!(provider = %config.provider, model = %config.model, "chat model ready");
            Ok(Arc::new(chat))
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}
