//! Pipeline stages
//!
//! Every stage is the same composition: build prompt → one completion call →
//! extract into the stage's shape. A stage never retries, and never lets a
//! transport failure or malformed completion escape: both become sentinel
//! records. Only context sequencing errors propagate.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::completion::CompletionService;
use crate::config::GenerationParams;
use crate::context::ResearchContext;
use crate::extraction::{extract, sentinel, StageShape};
use crate::models::{Extracted, Provenance, Request, SentinelCause, StageId};
use crate::prompt;
use crate::Result;

pub mod decision;
pub mod modeling;
pub mod perception;
pub mod reasoning;

/// Shared plumbing for running one stage against a completion service.
#[derive(Clone)]
pub struct StageRunner {
    service: Arc<dyn CompletionService>,
    params: GenerationParams,
}

impl StageRunner {
    pub fn new(service: Arc<dyn CompletionService>, params: GenerationParams) -> Self {
        Self { service, params }
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Run `stage` and extract its structured record.
    pub async fn run<T: StageShape>(
        &self,
        stage: StageId,
        request: &Request,
        context: &ResearchContext,
    ) -> Result<Extracted<T>> {
        let prompt = prompt::build(stage, request, context)?;

        let extracted = match self.call(stage, &prompt).await {
            Ok(raw) => extract::<T>(&raw),
            Err(cause) => sentinel(cause),
        };

        if let Some(cause) = sentinel_cause(&extracted.provenance) {
            warn!(stage = %stage, cause = %cause, "Stage produced sentinel record");
        }

        Ok(extracted)
    }

    /// Run `stage` and return its raw completion text, or the sentinel cause.
    pub async fn run_text(
        &self,
        stage: StageId,
        request: &Request,
        context: &ResearchContext,
    ) -> Result<std::result::Result<String, SentinelCause>> {
        let prompt = prompt::build(stage, request, context)?;
        Ok(self.call(stage, &prompt).await)
    }

    async fn call(&self, stage: StageId, prompt: &str) -> std::result::Result<String, SentinelCause> {
        let started = Instant::now();
        debug!(
            stage = %stage,
            provider = self.service.name(),
            prompt_chars = prompt.len(),
            "Invoking completion service"
        );

        match self.service.complete(prompt, &self.params).await {
            Ok(raw) => {
                debug!(
                    stage = %stage,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    response_chars = raw.len(),
                    "Completion received"
                );
                Ok(raw)
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Completion service failed");
                Err(SentinelCause::Transport {
                    message: e.to_string(),
                })
            }
        }
    }
}

fn sentinel_cause(provenance: &Provenance) -> Option<&SentinelCause> {
    match provenance {
        Provenance::Sentinel { cause } => Some(cause),
        Provenance::Model { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::mock::{ScriptStep, ScriptedCompletion};
    use crate::error::{PipelineError, TransportError};
    use crate::models::{PerceptionRecord, WorldModel};

    fn request() -> Request {
        Request::new("ai", "semiconductors", "long").unwrap()
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_tagged_sentinel() {
        let service = Arc::new(ScriptedCompletion::always(ScriptStep::Fail(
            TransportError::Timeout { after_ms: 60_000 },
        )));
        let runner = StageRunner::new(service, GenerationParams::default());

        let out: Extracted<PerceptionRecord> = runner
            .run(StageId::Perception, &request(), &ResearchContext::new())
            .await
            .unwrap();

        match out.provenance {
            Provenance::Sentinel { cause: SentinelCause::Transport { message } } => {
                assert!(message.contains("timed out"));
            }
            other => panic!("expected transport sentinel, got {:?}", other),
        }
        assert_eq!(out.record, PerceptionRecord::sentinel());
    }

    #[tokio::test]
    async fn test_missing_context_propagates_without_calling_service() {
        let service = Arc::new(ScriptedCompletion::replies(["unused"]));
        let runner = StageRunner::new(service.clone(), GenerationParams::default());

        let err = runner
            .run::<WorldModel>(StageId::Modeling, &request(), &ResearchContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MissingContextField { .. }));
        assert_eq!(service.call_count(), 0);
    }
}
