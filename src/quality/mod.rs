//! Quality audit over a finished run
//!
//! Rules-based, deterministic. Rules only report: they never rewrite a
//! record, so a mismatched plan id or a short list stays visible to the
//! caller exactly as the model produced it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::context::ResearchContext;
use crate::models::{Provenance, StageId, StageSummary};

pub const MIN_NEWS: usize = 3;
pub const MIN_RISKS: usize = 3;
pub const MIN_OPPORTUNITIES: usize = 3;
pub const MIN_PROS: usize = 3;
pub const MIN_CONS: usize = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    SentinelStage { cause: String },
    UnknownSelectedPlan { selected: String, candidates: Vec<String> },
    DuplicatePlanIds { ids: Vec<String> },
    PlanCountMismatch { expected: usize, actual: usize },
    BelowExpectedCount { field: String, expected: usize, actual: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityIssue {
    pub rule: String,
    pub severity: Severity,
    pub stage: StageId,
    #[serde(flatten)]
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QualityReport {
    pub issues: Vec<QualityIssue>,
    pub max_severity: Option<Severity>,
    /// True iff some stage fell back to a sentinel record.
    pub degraded: bool,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues_of(&self, stage: StageId) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |i| i.stage == stage)
    }
}

/// Everything a rule may inspect.
pub struct RunOutputs<'a> {
    pub stages: &'a [StageSummary],
    pub context: &'a ResearchContext,
}

pub trait QualityRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn severity(&self) -> Severity;

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)>;
}

pub struct QualityEngine {
    rules: Vec<Box<dyn QualityRule>>,
}

impl QualityEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn QualityRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, run: &RunOutputs<'_>) -> QualityReport {
        let mut issues = Vec::new();

        for rule in &self.rules {
            for (stage, kind) in rule.check(run) {
                warn!(rule = rule.name(), stage = %stage, issue = ?kind, "Quality issue");
                issues.push(QualityIssue {
                    rule: rule.name().to_string(),
                    severity: rule.severity(),
                    stage,
                    kind,
                });
            }
        }

        let max_severity = issues.iter().map(|i| i.severity).max();
        let degraded = run.stages.iter().any(|s| s.provenance.is_sentinel());

        info!(
            rule_count = self.rules.len(),
            issue_count = issues.len(),
            degraded,
            "Quality audit completed"
        );

        QualityReport {
            issues,
            max_severity,
            degraded,
        }
    }
}

impl Default for QualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Rule: every stage should come from real model output
pub struct SentinelStageRule;

impl QualityRule for SentinelStageRule {
    fn name(&self) -> &'static str {
        "sentinel_stage"
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)> {
        run.stages
            .iter()
            .filter_map(|s| match &s.provenance {
                Provenance::Sentinel { cause } => Some((
                    s.stage,
                    IssueKind::SentinelStage {
                        cause: cause.to_string(),
                    },
                )),
                Provenance::Model { .. } => None,
            })
            .collect()
    }
}

/// Rule: the decision must select one of the offered plans
pub struct SelectedPlanRule;

impl QualityRule for SelectedPlanRule {
    fn name(&self) -> &'static str {
        "selected_plan_membership"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)> {
        let (Some(decision), Some(plans)) = (run.context.decision(), run.context.plans()) else {
            return vec![];
        };

        // Already reported by SentinelStageRule.
        if decision.is_sentinel() {
            return vec![];
        }

        if plans.record.contains_id(&decision.record.selected_plan_id) {
            return vec![];
        }

        vec![(
            StageId::Decision,
            IssueKind::UnknownSelectedPlan {
                selected: decision.record.selected_plan_id.clone(),
                candidates: plans.record.ids(),
            },
        )]
    }
}

/// Rule: plan ids must be unique for the selection to be unambiguous
pub struct DuplicatePlanIdRule;

impl QualityRule for DuplicatePlanIdRule {
    fn name(&self) -> &'static str {
        "duplicate_plan_ids"
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)> {
        let Some(plans) = run.context.plans() else {
            return vec![];
        };

        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<String> = plans
            .record
            .iter()
            .filter(|p| !seen.insert(p.id.as_str()))
            .map(|p| p.id.clone())
            .collect();

        if duplicates.is_empty() {
            vec![]
        } else {
            vec![(
                StageId::Reasoning,
                IssueKind::DuplicatePlanIds {
                    ids: duplicates.into_iter().collect(),
                },
            )]
        }
    }
}

/// Rule: the reasoning stage should return the requested number of plans
pub struct PlanCountRule {
    pub expected: usize,
}

impl QualityRule for PlanCountRule {
    fn name(&self) -> &'static str {
        "plan_count"
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)> {
        match run.context.plans() {
            Some(plans) if !plans.is_sentinel() && plans.record.len() != self.expected => vec![(
                StageId::Reasoning,
                IssueKind::PlanCountMismatch {
                    expected: self.expected,
                    actual: plans.record.len(),
                },
            )],
            _ => vec![],
        }
    }
}

/// Rule: lists the prompts ask a minimum for should meet it
pub struct ExpectedCountRule;

impl QualityRule for ExpectedCountRule {
    fn name(&self) -> &'static str {
        "expected_counts"
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn check(&self, run: &RunOutputs<'_>) -> Vec<(StageId, IssueKind)> {
        let mut found = Vec::new();
        let mut expect = |stage: StageId, field: String, expected: usize, actual: usize| {
            if actual < expected {
                found.push((
                    stage,
                    IssueKind::BelowExpectedCount {
                        field,
                        expected,
                        actual,
                    },
                ));
            }
        };

        if let Some(p) = run.context.perception().filter(|p| !p.is_sentinel()) {
            expect(StageId::Perception, "recent_news".into(), MIN_NEWS, p.record.recent_news.len());
        }

        if let Some(w) = run.context.world_model().filter(|w| !w.is_sentinel()) {
            expect(StageId::Modeling, "risks".into(), MIN_RISKS, w.record.risks.len());
            expect(
                StageId::Modeling,
                "opportunities".into(),
                MIN_OPPORTUNITIES,
                w.record.opportunities.len(),
            );
        }

        if let Some(plans) = run.context.plans().filter(|p| !p.is_sentinel()) {
            for plan in plans.record.iter() {
                expect(StageId::Reasoning, format!("{}.pros", plan.id), MIN_PROS, plan.pros.len());
                expect(StageId::Reasoning, format!("{}.cons", plan.id), MIN_CONS, plan.cons.len());
            }
        }

        found
    }
}

/// Create a quality engine with the standard rules
pub fn create_default_quality_engine(expected_plan_count: usize) -> QualityEngine {
    let mut engine = QualityEngine::new();
    engine.add_rule(Box::new(SentinelStageRule));
    engine.add_rule(Box::new(SelectedPlanRule));
    engine.add_rule(Box::new(DuplicatePlanIdRule));
    engine.add_rule(Box::new(PlanCountRule {
        expected: expected_plan_count,
    }));
    engine.add_rule(Box::new(ExpectedCountRule));
    engine
}

//
// ================= Tests =================
//
