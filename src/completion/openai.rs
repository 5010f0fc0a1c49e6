//! OpenAI-compatible `/chat/completions` provider
//!
//! Works against OpenAI itself and the many servers that mimic it
//! (DashScope compatible mode, vLLM, Ollama's /v1).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::gemini::classify_status;
use super::CompletionService;
use crate::config::{CompletionConfig, GenerationParams};
use crate::error::{PipelineError, TransportError};

pub struct OpenAiCompatibleCompletion {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiCompatibleCompletion {
    pub fn new(config: &CompletionConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleCompletion {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, TransportError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, chars = prompt.len(), "Calling chat completions");

        let mut builder = self.client.post(&self.endpoint).json(&request);
        // Local servers usually run without a key.
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Chat completion request failed: {}", e);
            TransportError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Chat completion error response: {}", body);
            return Err(classify_status(status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("chat completion response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(TransportError::EmptyResponse)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
