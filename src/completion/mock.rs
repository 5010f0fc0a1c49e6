//! Scripted completion service for development & testing
//!
//! Replays a queue of canned outcomes, one per call, and records every prompt
//! it was given. Keeps the pipeline runnable without a provider.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::CompletionService;
use crate::config::GenerationParams;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(TransportError),
    /// Sleep, then reply. Used to exercise timeouts.
    Delay(Duration, String),
}

pub struct ScriptedCompletion {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<ScriptStep>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same outcome.
    pub fn always(step: ScriptStep) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(step),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order, one per call.
    pub fn replies<I, T>(replies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| ScriptStep::Reply(r.into())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let queued = self.script.lock().ok().and_then(|mut s| s.pop_front());
        queued.or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> std::result::Result<String, TransportError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match self.next_step() {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(e)) => Err(e),
            Some(ScriptStep::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(TransportError::NotConfigured(
                "scripted completion exhausted".to_string(),
            )),
        }
    }
}
