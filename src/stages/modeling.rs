//! Stage 2: world modeling
//!
//! Turns the perception record into a model of market state, cycle, risks,
//! opportunities and sentiment.

use super::StageRunner;
use crate::context::ResearchContext;
use crate::extraction::StageShape;
use crate::models::{Extracted, Request, StageId, WorldModel, SENTINEL_MARKER};
use crate::Result;

impl StageShape for WorldModel {
    const SHAPE: &'static str = "world model";

    fn sentinel() -> Self {
        WorldModel {
            state: SENTINEL_MARKER.to_string(),
            cycle: SENTINEL_MARKER.to_string(),
            risks: vec![SENTINEL_MARKER.to_string()],
            opportunities: vec![SENTINEL_MARKER.to_string()],
            sentiment: SENTINEL_MARKER.to_string(),
        }
    }
}

pub async fn run(
    runner: &StageRunner,
    request: &Request,
    context: &ResearchContext,
) -> Result<Extracted<WorldModel>> {
    runner.run(StageId::Modeling, request, context).await
}
