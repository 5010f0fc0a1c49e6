//! Stage 1: market perception
//!
//! Reads only the request. Produces the market overview, indicators, news and
//! segment trends that the modeling and report stages build on.

use std::collections::BTreeMap;

use super::StageRunner;
use crate::context::ResearchContext;
use crate::extraction::StageShape;
use crate::models::{Extracted, Indicator, PerceptionRecord, Request, StageId, SENTINEL_MARKER};
use crate::Result;

impl StageShape for PerceptionRecord {
    const SHAPE: &'static str = "perception record";

    fn sentinel() -> Self {
        PerceptionRecord {
            market_overview: SENTINEL_MARKER.to_string(),
            key_indicators: BTreeMap::from([(
                SENTINEL_MARKER.to_string(),
                Indicator {
                    value: SENTINEL_MARKER.to_string(),
                    explanation: SENTINEL_MARKER.to_string(),
                },
            )]),
            recent_news: vec![SENTINEL_MARKER.to_string()],
            industry_trends: BTreeMap::from([(
                SENTINEL_MARKER.to_string(),
                SENTINEL_MARKER.to_string(),
            )]),
        }
    }
}

pub async fn run(
    runner: &StageRunner,
    request: &Request,
    context: &ResearchContext,
) -> Result<Extracted<PerceptionRecord>> {
    runner.run(StageId::Perception, request, context).await
}
