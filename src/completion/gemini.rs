//! Gemini `generateContent` completion provider
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::CompletionService;
use crate::config::{CompletionConfig, GenerationParams};
use crate::error::{PipelineError, TransportError};

/// Reusable Gemini client (connection-pooled)
pub struct GeminiCompletion {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiCompletion {
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
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
        })
    }
}

#[async_trait]
impl CompletionService for GeminiCompletion {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, TransportError> {
        if self.api_key.is_empty() {
            return Err(TransportError::NotConfigured(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                max_output_tokens: params.max_tokens,
            },
        };

        debug!(endpoint = %self.endpoint, chars = prompt.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                TransportError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Gemini API error response: {}", body);
            return Err(classify_status(status, body));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(format!("Gemini response: {}", e)))?;

        first_text(gemini_response).ok_or(TransportError::EmptyResponse)
    }
}

pub(crate) fn classify_status(status: StatusCode, body: String) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::Quota(body)
    } else {
        TransportError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

fn first_text(response: GeminiResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .map(|p| p.text)
        .reduce(|mut acc, next| {
            acc.push_str(&next);
            acc
        })
        .filter(|text| !text.trim().is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}
