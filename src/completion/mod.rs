//! Completion service boundary
//!
//! Stages see one async call: prompt + sampling parameters in, text or a
//! `TransportError` out. Timeouts and retries live in `ResilientCompletion`,
//! never in the stages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{CompletionConfig, GenerationParams, Provider};
use crate::error::TransportError;

pub mod gemini;
pub mod mock;
pub mod openai;

pub use gemini::GeminiCompletion;
pub use mock::ScriptedCompletion;
pub use openai::OpenAiCompatibleCompletion;

/// Text completion provider.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, TransportError>;
}

#[async_trait]
impl<S: CompletionService + ?Sized> CompletionService for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, TransportError> {
        (**self).complete(prompt, params).await
    }
}

/// Bounded timeout and retry policy for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
        }
    }

    /// Exponential delay before retry number `attempt` (0-based), capped at 2^6.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << attempt.min(6))
    }
}

/// Wraps a provider with a per-attempt timeout and retry-with-backoff.
pub struct ResilientCompletion<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: CompletionService> ResilientCompletion<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for ResilientCompletion<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, TransportError> {
        let attempts = self.policy.max_retries + 1;
        let mut last_err = TransportError::EmptyResponse;

        for attempt in 0..attempts {
            let started = Instant::now();

            let outcome = match tokio::time::timeout(
                self.policy.timeout,
                self.inner.complete(prompt, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    after_ms: self.policy.timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(text) => {
                    debug!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        chars = text.len(),
                        "Completion received"
                    );
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    last_err = e;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "Completion failed"
                    );
                    return Err(e);
                }
            }
        }

        Err(last_err)
    }
}

/// Build the configured provider, already wrapped in the retry policy.
pub fn build_completion_service(
    config: &CompletionConfig,
) -> crate::Result<Arc<dyn CompletionService>> {
    let policy = RetryPolicy::from_config(config);

    let service: Arc<dyn CompletionService> = match config.provider {
        Provider::Gemini => Arc::new(ResilientCompletion::new(
            GeminiCompletion::new(config)?,
            policy,
        )),
        Provider::OpenAi => Arc::new(ResilientCompletion::new(
            OpenAiCompatibleCompletion::new(config)?,
            policy,
        )),
    };

    Ok(service)
}
