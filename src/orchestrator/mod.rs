//! Pipeline orchestrator
//!
//! PERCEPTION → MODELING → REASONING → DECISION/REPORT → DONE
//!
//! Strictly linear. Every transition is unconditional once the previous stage
//! has produced a record (possibly a sentinel), so a run always reaches `Done`
//! unless the caller cancels or the stages are mis-sequenced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::CompletionService;
use crate::config::PipelineConfig;
use crate::context::{ContextEntry, ResearchContext};
use crate::error::PipelineError;
use crate::models::{Artifact, Provenance, Request, StageId, StageSummary};
use crate::quality::{create_default_quality_engine, QualityEngine, RunOutputs};
use crate::stages::{decision, modeling, perception, reasoning, StageRunner};
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Perception,
    Modeling,
    Reasoning,
    DecisionReport,
    Done,
}

impl PipelineState {
    pub fn next(self) -> Self {
        match self {
            PipelineState::Perception => PipelineState::Modeling,
            PipelineState::Modeling => PipelineState::Reasoning,
            PipelineState::Reasoning => PipelineState::DecisionReport,
            PipelineState::DecisionReport | PipelineState::Done => PipelineState::Done,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Perception => "PERCEPTION",
            PipelineState::Modeling => "MODELING",
            PipelineState::Reasoning => "REASONING",
            PipelineState::DecisionReport => "DECISION_REPORT",
            PipelineState::Done => "DONE",
        };
        write!(f, "{}", s)
    }
}

/// Per-run bookkeeping: current state, stage summaries and the trace.
struct RunLog {
    run_id: Uuid,
    state: PipelineState,
    stages: Vec<StageSummary>,
    trace: Vec<String>,
}

impl RunLog {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: PipelineState::Perception,
            stages: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Refuse to enter the current state if the caller has cancelled.
    fn checkpoint(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            warn!(run_id = %self.run_id, before = %self.state, "Pipeline cancelled");
            self.trace.push(format!("CANCELLED: before {}", self.state));
            return Err(PipelineError::Cancelled { before: self.state });
        }

        info!(run_id = %self.run_id, state = %self.state, "Entering state");
        Ok(())
    }

    fn record(&mut self, stage: StageId, provenance: &Provenance) {
        let line = match provenance {
            Provenance::Model { tier } => format!("{}: extracted ({:?})", self.state, tier),
            Provenance::Sentinel { cause } => format!("{}: sentinel ({})", self.state, cause),
        };
        debug!(run_id = %self.run_id, stage = %stage, "{}", line);
        self.trace.push(line);
        self.stages.push(StageSummary {
            stage,
            provenance: provenance.clone(),
        });
    }

    fn advance(&mut self) {
        self.state = self.state.next();
    }
}

/// Runs research requests through the four-stage pipeline.
///
/// Holds no per-run state, so one instance behind `Arc` can serve many
/// concurrent runs.
pub struct Orchestrator {
    runner: StageRunner,
    quality_engine: QualityEngine,
}

impl Orchestrator {
    pub fn new(service: Arc<dyn CompletionService>, config: PipelineConfig) -> Self {
        Self {
            runner: StageRunner::new(service, config.generation),
            quality_engine: create_default_quality_engine(config.expected_plan_count),
        }
    }

    /// Replace the default quality rules.
    pub fn with_quality_engine(mut self, engine: QualityEngine) -> Self {
        self.quality_engine = engine;
        self
    }

    /// Validate the three fields and run to completion.
    pub async fn run_topic(
        &self,
        topic: impl Into<String>,
        focus: impl Into<String>,
        horizon: impl Into<String>,
    ) -> Result<Artifact> {
        self.run(Request::new(topic, focus, horizon)?).await
    }

    pub async fn run(&self, request: Request) -> Result<Artifact> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run the pipeline, checking `cancel` before every state transition.
    pub async fn run_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Artifact> {
        let start_time = Instant::now();
        let started_at = Utc::now();
        let mut log = RunLog::new(Uuid::new_v4());
        let mut context = ResearchContext::new();

        info!(
            run_id = %log.run_id,
            topic = request.topic(),
            focus = request.focus(),
            horizon = request.horizon(),
            "Pipeline: starting run"
        );
        log.trace.push(format!(
            "INPUT: {} / {} / {}",
            request.topic(),
            request.focus(),
            request.horizon()
        ));

        // === PERCEPTION ===
        log.checkpoint(cancel)?;
        let observed = perception::run(&self.runner, &request, &context).await?;
        log.record(StageId::Perception, &observed.provenance);
        context.insert(ContextEntry::Perception(observed))?;
        log.advance();

        // === MODELING ===
        log.checkpoint(cancel)?;
        let world = modeling::run(&self.runner, &request, &context).await?;
        log.record(StageId::Modeling, &world.provenance);
        context.insert(ContextEntry::WorldModel(world))?;
        log.advance();

        // === REASONING ===
        log.checkpoint(cancel)?;
        let plans = reasoning::run(&self.runner, &request, &context).await?;
        log.record(StageId::Reasoning, &plans.provenance);
        let candidate_plan_ids = plans.record.ids();
        context.insert(ContextEntry::Plans(plans))?;
        log.advance();

        // === DECISION / REPORT ===
        log.checkpoint(cancel)?;
        let decided = decision::decide(&self.runner, &request, &context).await?;
        log.record(StageId::Decision, &decided.provenance);
        let selected = decided.record.clone();
        context.insert(ContextEntry::Decision(decided))?;

        let report = decision::write_report(&self.runner, &request, &context).await?;
        log.record(StageId::Report, &report.provenance);
        log.advance();

        // === QUALITY ===
        let quality = self.quality_engine.evaluate(&RunOutputs {
            stages: &log.stages,
            context: &context,
        });
        log.trace.push(format!(
            "QUALITY: {} issue(s), max severity {}",
            quality.issues.len(),
            quality
                .max_severity
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "none".to_string())
        ));

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        log.trace.push(format!("{}: artifact assembled in {} ms", log.state, elapsed_ms));

        if quality.degraded {
            warn!(
                run_id = %log.run_id,
                elapsed_ms,
                issues = quality.issues.len(),
                "Pipeline completed with degraded stages"
            );
        } else {
            info!(
                run_id = %log.run_id,
                elapsed_ms,
                issues = quality.issues.len(),
                "Pipeline completed"
            );
        }

        Ok(Artifact {
            run_id: log.run_id,
            request,
            decision: selected,
            report: report.record,
            candidate_plan_ids,
            stages: log.stages,
            quality,
            reasoning_trace: log.trace,
            started_at,
            completed_at: Utc::now(),
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::mock::{ScriptStep, ScriptedCompletion};
    use crate::completion::{ResilientCompletion, RetryPolicy};
    use crate::config::GenerationParams;
    use crate::error::TransportError;
    use crate::models::{ContextKey, SENTINEL_MARKER};
    use crate::quality::IssueKind;
    use async_trait::async_trait;
    use std::time::Duration;

    const PERCEPTION_JSON: &str = r#"{"market_overview":"ok","key_indicators":{},"recent_news":["n1","n2","n3"],"industry_trends":{}}"#;

    const WORLD_JSON: &str = r#"{"state":"expansion","cycle":"mid-cycle","risks":["r1","r2","r3"],"opportunities":["o1","o2","o3"],"sentiment":"constructive"}"#;

    const PLANS_JSON: &str = r#"[
        {"id":"A","hypothesis":"grid capex","approach":"top-down","expected_outcome":"outperform","confidence":0.7,"pros":["p1","p2","p3"],"cons":["c1","c2"]},
        {"id":"B","hypothesis":"storage","approach":"bottom-up","expected_outcome":"re-rating","confidence":0.6,"pros":["p1","p2","p3"],"cons":["c1","c2"]},
        {"id":"C","hypothesis":"utilities","approach":"relative value","expected_outcome":"steady yield","confidence":0.5,"pros":["p1","p2","p3"],"cons":["c1","c2"]}
    ]"#;

    const TWO_PLANS_JSON: &str = r#"[
        {"id":"A","hypothesis":"h","approach":"a","expected_outcome":"e","confidence":0.7,"pros":["p1","p2","p3"],"cons":["c1","c2"]},
        {"id":"B","hypothesis":"h","approach":"a","expected_outcome":"e","confidence":0.6,"pros":["p1","p2","p3"],"cons":["c1","c2"]}
    ]"#;

    const DECISION_JSON: &str = r#"{"selected_plan_id":"B","thesis":"storage demand","evidence":["e1","e2"],"risk_assessment":"moderate","recommendation":"overweight","timeframe":"12-18 months"}"#;

    const REPORT_TEXT: &str = "# Grid storage\n\nExecutive summary...";

    fn request() -> Request {
        Request::new("new energy", "power grid", "medium-term").unwrap()
    }

    fn orchestrator(service: Arc<dyn CompletionService>) -> Orchestrator {
        Orchestrator::new(service, PipelineConfig::default())
    }

    fn happy_script() -> Arc<ScriptedCompletion> {
        Arc::new(ScriptedCompletion::replies([
            PERCEPTION_JSON,
            WORLD_JSON,
            PLANS_JSON,
            DECISION_JSON,
            REPORT_TEXT,
        ]))
    }

    #[tokio::test]
    async fn test_clean_run_selects_generated_plan() {
        let service = happy_script();
        let artifact = orchestrator(service.clone()).run(request()).await.unwrap();

        assert_eq!(artifact.candidate_plan_ids, vec!["A", "B", "C"]);
        assert!(artifact
            .candidate_plan_ids
            .contains(&artifact.decision.selected_plan_id));
        assert_eq!(artifact.report.as_str(), REPORT_TEXT);
        assert!(!artifact.is_degraded());
        assert!(artifact.quality.is_clean(), "{:?}", artifact.quality.issues);
        assert_eq!(service.call_count(), 5);

        let stages: Vec<StageId> = artifact.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, StageId::ALL.to_vec());
        assert!(artifact.reasoning_trace.first().unwrap().starts_with("INPUT"));
        assert!(artifact.reasoning_trace.last().unwrap().starts_with("DONE"));
    }

    #[tokio::test]
    async fn test_prose_wrapped_perception_is_recovered() {
        let wrapped = format!("Here is the result:\n{}\nHope this helps", PERCEPTION_JSON);
        let service = Arc::new(ScriptedCompletion::replies([
            wrapped.as_str(),
            WORLD_JSON,
            PLANS_JSON,
            DECISION_JSON,
            REPORT_TEXT,
        ]));

        let artifact = orchestrator(service.clone()).run(request()).await.unwrap();
        assert!(!artifact.is_degraded());
        assert_eq!(
            artifact.stages[0].provenance,
            Provenance::Model {
                tier: crate::models::ExtractionTier::Embedded
            }
        );
        // The recovered record is what modeling sees.
        assert!(service.prompts()[1].contains("\"market_overview\": \"ok\""));
    }

    #[tokio::test]
    async fn test_modeling_timeout_degrades_but_completes() {
        let scripted = Arc::new(ScriptedCompletion::new(vec![
            ScriptStep::Reply(PERCEPTION_JSON.into()),
            ScriptStep::Delay(Duration::from_millis(500), WORLD_JSON.into()),
            ScriptStep::Reply(PLANS_JSON.into()),
            ScriptStep::Reply(DECISION_JSON.into()),
            ScriptStep::Reply(REPORT_TEXT.into()),
        ]));
        let resilient = ResilientCompletion::new(
            scripted.clone(),
            RetryPolicy {
                timeout: Duration::from_millis(20),
                max_retries: 0,
                backoff_base: Duration::from_millis(1),
            },
        );

        let artifact = orchestrator(Arc::new(resilient)).run(request()).await.unwrap();

        assert_eq!(artifact.degraded_stages(), vec![StageId::Modeling]);
        assert!(matches!(
            &artifact.stages[1].provenance,
            Provenance::Sentinel { cause } if cause.to_string().contains("timed out")
        ));
        assert_eq!(artifact.decision.selected_plan_id, "B");

        // Downstream prompts carry the visible marker instead of a world model.
        let prompts = scripted.prompts();
        assert!(prompts[2].contains(SENTINEL_MARKER));
        assert!(prompts[3].contains(SENTINEL_MARKER));
        assert!(artifact.quality.degraded);
    }

    #[tokio::test]
    async fn test_two_plans_are_accepted() {
        let service = Arc::new(ScriptedCompletion::replies([
            PERCEPTION_JSON,
            WORLD_JSON,
            TWO_PLANS_JSON,
            DECISION_JSON,
            REPORT_TEXT,
        ]));

        let artifact = orchestrator(service).run(request()).await.unwrap();

        assert!(!artifact.is_degraded());
        assert_eq!(artifact.candidate_plan_ids, vec!["A", "B"]);
        assert!(artifact
            .candidate_plan_ids
            .contains(&artifact.decision.selected_plan_id));
        assert!(artifact.quality.issues.iter().any(|i| i.kind
            == IssueKind::PlanCountMismatch {
                expected: 3,
                actual: 2
            }));
    }

    #[tokio::test]
    async fn test_unknown_selection_is_reported() {
        let service = Arc::new(ScriptedCompletion::replies([
            PERCEPTION_JSON,
            WORLD_JSON,
            PLANS_JSON,
            r#"{"selected_plan_id":"Z","thesis":"t","evidence":[],"risk_assessment":"r","recommendation":"hold","timeframe":"1y"}"#,
            REPORT_TEXT,
        ]));

        let artifact = orchestrator(service).run(request()).await.unwrap();
        assert_eq!(artifact.decision.selected_plan_id, "Z");
        assert!(artifact
            .quality
            .issues
            .iter()
            .any(|i| matches!(i.kind, IssueKind::UnknownSelectedPlan { .. })));
    }

    #[tokio::test]
    async fn test_garbage_everywhere_still_yields_artifact() {
        let service = Arc::new(ScriptedCompletion::always(ScriptStep::Reply(
            "I'd rather not answer in JSON.".into(),
        )));

        let artifact = orchestrator(service).run(request()).await.unwrap();

        // Report is free text, so only the four structured stages degrade.
        assert_eq!(
            artifact.degraded_stages(),
            vec![
                StageId::Perception,
                StageId::Modeling,
                StageId::Reasoning,
                StageId::Decision
            ]
        );
        assert_eq!(artifact.decision.selected_plan_id, SENTINEL_MARKER);
        assert_eq!(artifact.report.as_str(), "I'd rather not answer in JSON.");
    }

    #[tokio::test]
    async fn test_failing_service_still_yields_artifact() {
        let service = Arc::new(ScriptedCompletion::always(ScriptStep::Fail(
            TransportError::Unreachable("connection refused".into()),
        )));

        let artifact = orchestrator(service.clone()).run(request()).await.unwrap();

        assert_eq!(artifact.degraded_stages(), StageId::ALL.to_vec());
        assert_eq!(artifact.report.as_str(), SENTINEL_MARKER);
        assert_eq!(service.call_count(), 5);
        assert_eq!(artifact.quality.max_severity, Some(crate::quality::Severity::High));
    }

    #[tokio::test]
    async fn test_each_stage_sees_only_its_inputs() {
        let service = happy_script();
        orchestrator(service.clone()).run(request()).await.unwrap();
        let prompts = service.prompts();

        assert!(!prompts[0].contains("MARKET DATA"));
        assert!(prompts[1].contains("\"recent_news\""));
        assert!(!prompts[2].contains("\"recent_news\""));
        assert!(prompts[2].contains("\"sentiment\""));
        assert!(prompts[3].contains("CANDIDATE PLANS"));
        assert!(!prompts[3].contains("\"recent_news\""));
        assert!(prompts[4].contains("\"selected_plan_id\": \"B\""));
        assert!(!prompts[4].contains("grid capex"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let service = happy_script();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(service.clone())
            .run_with_cancel(request(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cancelled {
                before: PipelineState::Perception
            }
        ));
        assert_eq!(service.call_count(), 0);
    }

    /// Cancels its token once the first completion is served.
    struct CancelAfterFirst {
        inner: ScriptedCompletion,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl CompletionService for CancelAfterFirst {
        fn name(&self) -> &str {
            "cancel-after-first"
        }

        async fn complete(
            &self,
            prompt: &str,
            params: &GenerationParams,
        ) -> std::result::Result<String, TransportError> {
            let out = self.inner.complete(prompt, params).await;
            self.cancel.cancel();
            out
        }
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_stages() {
        let cancel = CancellationToken::new();
        let service = Arc::new(CancelAfterFirst {
            inner: ScriptedCompletion::replies([PERCEPTION_JSON, WORLD_JSON]),
            cancel: cancel.clone(),
        });

        let err = orchestrator(service.clone())
            .run_with_cancel(request(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cancelled {
                before: PipelineState::Modeling
            }
        ));
        assert_eq!(service.inner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_topic_rejects_blank_input() {
        let service = happy_script();
        let err = orchestrator(service.clone())
            .run_topic("", "grid", "long")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert_eq!(service.call_count(), 0);
    }

    /// Answers by recognising which stage a prompt belongs to, so runs can
    /// share one service concurrently.
    struct StageRouter;

    #[async_trait]
    impl CompletionService for StageRouter {
        fn name(&self) -> &str {
            "router"
        }

        async fn complete(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> std::result::Result<String, TransportError> {
            tokio::task::yield_now().await;
            let topic = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Research topic: "))
                .unwrap_or_default();

            let reply = if prompt.contains("SELECTED INVESTMENT DECISION") {
                format!("Report on {}", topic)
            } else if prompt.contains("CANDIDATE PLANS") {
                DECISION_JSON.to_string()
            } else if prompt.contains("MARKET MODEL") {
                PLANS_JSON.to_string()
            } else if prompt.contains("MARKET DATA") {
                WORLD_JSON.to_string()
            } else {
                PERCEPTION_JSON.to_string()
            };
            Ok(reply)
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let orchestrator = Arc::new(orchestrator(Arc::new(StageRouter)));

        let handles: Vec<_> = ["solar", "wind", "hydro", "nuclear"]
            .into_iter()
            .map(|topic| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.run_topic(topic, "power", "long").await })
            })
            .collect();

        for (handle, topic) in handles.into_iter().zip(["solar", "wind", "hydro", "nuclear"]) {
            let artifact = handle.await.unwrap().unwrap();
            assert_eq!(artifact.request.topic(), topic);
            assert_eq!(artifact.report.as_str(), format!("Report on {}", topic));
            assert!(!artifact.is_degraded());
        }
    }

    #[test]
    fn test_state_sequence_is_linear() {
        let mut state = PipelineState::Perception;
        let mut seen = vec![state];
        while state != PipelineState::Done {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(PipelineState::Done.next(), PipelineState::Done);
        assert_eq!(ContextKey::Decision.produced_by(), StageId::Decision);
    }
}
