//! Stage 4: decision, then report
//!
//! Two chained calls sharing the stage contract. The decision reads the world
//! model and the candidate plans; the report reads perception, world model and
//! the decision that was just inserted into the context.

use tracing::warn;

use super::StageRunner;
use crate::context::ResearchContext;
use crate::extraction::StageShape;
use crate::models::{
    Decision, ExtractionTier, Extracted, Provenance, Report, Request, SentinelCause, StageId,
    SENTINEL_MARKER,
};
use crate::Result;

impl StageShape for Decision {
    const SHAPE: &'static str = "decision";

    fn sentinel() -> Self {
        Decision {
            selected_plan_id: SENTINEL_MARKER.to_string(),
            thesis: SENTINEL_MARKER.to_string(),
            evidence: vec![SENTINEL_MARKER.to_string()],
            risk_assessment: SENTINEL_MARKER.to_string(),
            recommendation: SENTINEL_MARKER.to_string(),
            timeframe: SENTINEL_MARKER.to_string(),
        }
    }
}

impl Report {
    pub fn sentinel() -> Self {
        Report(SENTINEL_MARKER.to_string())
    }
}

/// First sub-call: pick a plan and justify it.
pub async fn decide(
    runner: &StageRunner,
    request: &Request,
    context: &ResearchContext,
) -> Result<Extracted<Decision>> {
    runner.run(StageId::Decision, request, context).await
}

/// Second sub-call: long-form report. Free text, so only blank output is malformed.
pub async fn write_report(
    runner: &StageRunner,
    request: &Request,
    context: &ResearchContext,
) -> Result<Extracted<Report>> {
    let report = match runner.run_text(StageId::Report, request, context).await? {
        Ok(text) => report_from_text(&text),
        Err(cause) => sentinel_report(cause),
    };
    Ok(report)
}

fn report_from_text(text: &str) -> Extracted<Report> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return sentinel_report(SentinelCause::Malformed {
            detail: "report text is blank".to_string(),
        });
    }

    Extracted {
        record: Report(trimmed.to_string()),
        provenance: Provenance::Model {
            tier: ExtractionTier::Direct,
        },
    }
}

fn sentinel_report(cause: SentinelCause) -> Extracted<Report> {
    warn!(cause = %cause, "Report unavailable, substituting sentinel");
    Extracted {
        record: Report::sentinel(),
        provenance: Provenance::Sentinel { cause },
    }
}
