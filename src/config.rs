//! Explicit configuration for the completion service and the pipeline
//!
//! Nothing here is global: the CLI (or any host) builds these once and hands
//! them to the constructors that need them.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;
use crate::Result;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_PLAN_COUNT: usize = 3;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_MODEL: &str = "gemini-2.0-flash";
const OPENAI_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const OPENAI_MODEL: &str = "qwen-turbo";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    /// Any `/chat/completions` endpoint (OpenAI, DashScope compatible mode, vLLM...)
    OpenAi,
}

impl FromStr for Provider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" | "openai-compatible" | "dashscope" | "qwen" => Ok(Provider::OpenAi),
            other => Err(PipelineError::Configuration(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        };
        write!(f, "{}", s)
    }
}

/// Sampling parameters sent with every completion call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            max_tokens: 2000,
        }
    }
}

/// Connection, timeout and retry settings for a completion provider.
#[derive(Clone)]
pub struct CompletionConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

// Hand-written so the key never lands in logs.
impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("provider", &self.provider)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .finish()
    }
}

impl CompletionConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let (base_url, model) = match provider {
            Provider::Gemini => (GEMINI_BASE_URL, GEMINI_MODEL),
            Provider::OpenAi => (OPENAI_BASE_URL, OPENAI_MODEL),
        };

        Self {
            provider,
            api_key: api_key.into(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }

    /// Load from the process environment (after reading `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("RESEARCH_PROVIDER") {
            Some(p) => p.parse()?,
            None if lookup("GEMINI_API_KEY").is_some() => Provider::Gemini,
            None => Provider::OpenAi,
        };

        let api_key = match provider {
            Provider::Gemini => lookup("GEMINI_API_KEY"),
            Provider::OpenAi => lookup("OPENAI_API_KEY").or_else(|| lookup("DASHSCOPE_API_KEY")),
        }
        .unwrap_or_default();

        let mut config = Self::new(provider, api_key);

        if let Some(model) = lookup("RESEARCH_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model;
        }
        if let Some(url) = lookup("RESEARCH_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = lookup("RESEARCH_TIMEOUT_SECS") {
            let secs: u64 = parse_number("RESEARCH_TIMEOUT_SECS", &secs)?;
            if secs == 0 {
                return Err(PipelineError::Configuration(
                    "RESEARCH_TIMEOUT_SECS must be positive".to_string(),
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = lookup("RESEARCH_MAX_RETRIES") {
            config.max_retries = parse_number("RESEARCH_MAX_RETRIES", &retries)?;
        }

        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Configuration(format!("{} is not a valid number: {:?}", key, raw)))
}

/// Orchestrator-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub generation: GenerationParams,
    /// Plan count the reasoning stage is asked for; deviations are reported, not rejected.
    pub expected_plan_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation: GenerationParams::default(),
            expected_plan_count: DEFAULT_PLAN_COUNT,
        }
    }
}
