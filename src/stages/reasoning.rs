//! Stage 3: plan generation
//!
//! Reads only the world model and asks for a set of structurally distinct
//! candidate plans. Any non-empty array of well-formed plans is accepted;
//! how many came back is a quality concern, not a parse failure.

use tracing::warn;

use super::StageRunner;
use crate::context::ResearchContext;
use crate::extraction::StageShape;
use crate::models::{Extracted, Plan, PlanSet, Request, StageId, SENTINEL_MARKER};
use crate::Result;

impl StageShape for PlanSet {
    const SHAPE: &'static str = "plan set";
    const DELIMITERS: (char, char) = ('[', ']');

    fn sentinel() -> Self {
        PlanSet(vec![Plan {
            id: SENTINEL_MARKER.to_string(),
            hypothesis: SENTINEL_MARKER.to_string(),
            approach: SENTINEL_MARKER.to_string(),
            expected_outcome: SENTINEL_MARKER.to_string(),
            confidence: 0.0,
            pros: vec![SENTINEL_MARKER.to_string()],
            cons: vec![SENTINEL_MARKER.to_string()],
        }])
    }

    fn validate(self) -> std::result::Result<Self, String> {
        if self.is_empty() {
            return Err("plan array is empty".to_string());
        }

        let mut plans = self.0;
        for plan in plans.iter_mut() {
            if plan.confidence.is_nan() {
                return Err(format!("plan '{}' has a non-numeric confidence", plan.id));
            }
            if !(0.0..=1.0).contains(&plan.confidence) {
                warn!(plan_id = %plan.id, confidence = plan.confidence, "Clamping confidence into [0, 1]");
                plan.confidence = plan.confidence.clamp(0.0, 1.0);
            }
        }

        Ok(PlanSet(plans))
    }
}

pub async fn run(
    runner: &StageRunner,
    request: &Request,
    context: &ResearchContext,
) -> Result<Extracted<PlanSet>> {
    runner.run(StageId::Reasoning, request, context).await
}
