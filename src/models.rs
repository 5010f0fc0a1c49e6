//! Core data models for the research pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::quality::QualityReport;

/// Marker written into every field of a sentinel record.
pub const SENTINEL_MARKER: &str = "[parse failed]";

//
// ================= Stage identifiers =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Perception,
    Modeling,
    Reasoning,
    Decision,
    Report,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::Perception,
        StageId::Modeling,
        StageId::Reasoning,
        StageId::Decision,
        StageId::Report,
    ];
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageId::Perception => "perception",
            StageId::Modeling => "modeling",
            StageId::Reasoning => "reasoning",
            StageId::Decision => "decision",
            StageId::Report => "report",
        };
        write!(f, "{}", s)
    }
}

/// Keys of the append-only run context, one per producing stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Perception,
    WorldModel,
    Plans,
    Decision,
}

impl ContextKey {
    pub fn produced_by(&self) -> StageId {
        match self {
            ContextKey::Perception => StageId::Perception,
            ContextKey::WorldModel => StageId::Modeling,
            ContextKey::Plans => StageId::Reasoning,
            ContextKey::Decision => StageId::Decision,
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextKey::Perception => "perception",
            ContextKey::WorldModel => "world_model",
            ContextKey::Plans => "plans",
            ContextKey::Decision => "decision",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Request =================
//

/// Research request. Fields are fixed at construction and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawRequest")]
pub struct Request {
    topic: String,
    focus: String,
    horizon: String,
}

#[derive(Deserialize)]
struct RawRequest {
    topic: String,
    focus: String,
    horizon: String,
}

impl TryFrom<RawRequest> for Request {
    type Error = PipelineError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        Request::new(raw.topic, raw.focus, raw.horizon)
    }
}

impl Request {
    pub fn new(
        topic: impl Into<String>,
        focus: impl Into<String>,
        horizon: impl Into<String>,
    ) -> crate::Result<Self> {
        let topic = require_text("topic", topic.into())?;
        let focus = require_text("focus", focus.into())?;
        let horizon = require_text("horizon", horizon.into())?;
        Ok(Self { topic, focus, horizon })
    }

    /// Parse the `topic,focus,horizon` shorthand. Full-width commas are accepted.
    pub fn parse_triplet(input: &str) -> crate::Result<Self> {
        let parts: Vec<&str> = input
            .split(|c: char| c == ',' || c == '，')
            .map(str::trim)
            .collect();

        match parts.as_slice() {
            [topic, focus, horizon] => Request::new(*topic, *focus, *horizon),
            _ => Err(PipelineError::InvalidRequest(format!(
                "expected 'topic,focus,horizon', got {} part(s)",
                parts.len()
            ))),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn focus(&self) -> &str {
        &self.focus
    }

    pub fn horizon(&self) -> &str {
        &self.horizon
    }
}

fn require_text(field: &str, value: String) -> crate::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidRequest(format!("{} must not be blank", field)));
    }
    Ok(trimmed.to_string())
}

//
// ================= Perception =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerceptionRecord {
    pub market_overview: String,
    pub key_indicators: BTreeMap<String, Indicator>,
    pub recent_news: Vec<String>,
    pub industry_trends: BTreeMap<String, String>,
}

/// A named indicator. Accepts `{value, explanation}` or a bare scalar on input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawIndicator")]
pub struct Indicator {
    pub value: String,
    pub explanation: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIndicator {
    Detailed {
        value: serde_json::Value,
        #[serde(default)]
        explanation: String,
    },
    Bare(serde_json::Value),
}

impl From<RawIndicator> for Indicator {
    fn from(raw: RawIndicator) -> Self {
        match raw {
            RawIndicator::Detailed { value, explanation } => Indicator {
                value: scalar_text(value),
                explanation,
            },
            RawIndicator::Bare(value) => Indicator {
                value: scalar_text(value),
                explanation: String::new(),
            },
        }
    }
}

fn scalar_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

//
// ================= World model =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldModel {
    #[serde(alias = "market_state")]
    pub state: String,
    #[serde(alias = "economic_cycle")]
    pub cycle: String,
    #[serde(alias = "risk_factors")]
    pub risks: Vec<String>,
    #[serde(alias = "opportunity_areas")]
    pub opportunities: Vec<String>,
    #[serde(alias = "market_sentiment")]
    pub sentiment: String,
}

//
// ================= Plans =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(alias = "plan_id")]
    pub id: String,
    pub hypothesis: String,
    #[serde(alias = "analysis_approach")]
    pub approach: String,
    pub expected_outcome: String,
    #[serde(alias = "confidence_level", deserialize_with = "lenient_f64")]
    pub confidence: f64,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

/// Candidate plans produced by the reasoning stage, in model order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PlanSet(pub Vec<Plan>);

impl PlanSet {
    pub fn ids(&self) -> Vec<String> {
        self.0.iter().map(|p| p.id.clone()).collect()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.0.iter().any(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Plan> {
        self.0.iter()
    }
}

/// Models sometimes quote numbers; accept `0.8` and `"0.8"` alike.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Float(f64),
        Text(String),
    }

    match Number::deserialize(deserializer)? {
        Number::Float(v) => Ok(v),
        Number::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {:?}", s))),
    }
}

//
// ================= Decision & report =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub selected_plan_id: String,
    #[serde(alias = "investment_thesis")]
    pub thesis: String,
    #[serde(alias = "supporting_evidence")]
    pub evidence: Vec<String>,
    pub risk_assessment: String,
    pub recommendation: String,
    pub timeframe: String,
}

/// Long-form research report text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Report(pub String);

impl Report {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ================= Provenance =================
//

/// Which extraction tier recovered a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// The whole completion parsed as the expected shape.
    Direct,
    /// A balanced span inside surrounding prose parsed as the expected shape.
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SentinelCause {
    Malformed { detail: String },
    Transport { message: String },
}

impl fmt::Display for SentinelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentinelCause::Malformed { detail } => write!(f, "malformed output: {}", detail),
            SentinelCause::Transport { message } => write!(f, "transport failure: {}", message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Model { tier: ExtractionTier },
    Sentinel { cause: SentinelCause },
}

impl Provenance {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Provenance::Sentinel { .. })
    }
}

/// A stage output together with how it was obtained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extracted<T> {
    pub record: T,
    pub provenance: Provenance,
}

impl<T> Extracted<T> {
    pub fn is_sentinel(&self) -> bool {
        self.provenance.is_sentinel()
    }
}

//
// ================= Artifact =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageId,
    pub provenance: Provenance,
}

/// Terminal output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub run_id: Uuid,
    pub request: Request,
    pub decision: Decision,
    pub report: Report,
    pub candidate_plan_ids: Vec<String>,
    pub stages: Vec<StageSummary>,
    pub quality: QualityReport,
    pub reasoning_trace: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl Artifact {
    pub fn is_degraded(&self) -> bool {
        self.stages.iter().any(|s| s.provenance.is_sentinel())
    }

    pub fn degraded_stages(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|s| s.provenance.is_sentinel())
            .map(|s| s.stage)
            .collect()
    }
}
