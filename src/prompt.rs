//! Stage prompt builder
//!
//! `build` is pure: it projects the run context down to the fields the stage
//! may read (failing with `MissingContextField` before any formatting) and
//! renders that stage's template.

use crate::context::{ResearchContext, StageView};
use crate::models::{ContextKey, Request, StageId};
use crate::Result;

/// Render the prompt for `stage` from the request and the accumulated context.
pub fn build(stage: StageId, request: &Request, context: &ResearchContext) -> Result<String> {
    let view = context.view(stage)?;
    render(stage, request, &view)
}

fn render(stage: StageId, request: &Request, view: &StageView<'_>) -> Result<String> {
    let header = request_header(request);

    let prompt = match stage {
        StageId::Perception => perception_prompt(&header),
        StageId::Modeling => modeling_prompt(&header, &view.render(ContextKey::Perception)?),
        StageId::Reasoning => reasoning_prompt(&header, &view.render(ContextKey::WorldModel)?),
        StageId::Decision => decision_prompt(
            &header,
            &view.render(ContextKey::WorldModel)?,
            &view.render(ContextKey::Plans)?,
        ),
        StageId::Report => report_prompt(
            &header,
            &view.render(ContextKey::Perception)?,
            &view.render(ContextKey::WorldModel)?,
            &view.render(ContextKey::Decision)?,
        ),
    };

    Ok(prompt)
}

fn request_header(request: &Request) -> String {
    format!(
        "Research topic: {}\nIndustry focus: {}\nTime horizon: {}",
        request.topic(),
        request.focus(),
        request.horizon()
    )
}

fn perception_prompt(header: &str) -> String {
    format!(
        r#"You are a professional investment research analyst. Collect and organise market data and information on the following research subject.

{header}

Cover the following aspects:
1. Market overview and latest developments
2. Key economic and market indicators
3. Recent important news (at least 3 items)
4. Industry trend analysis (at least 3 segments)

Be as detailed and accurate as your expertise allows.

Return ONLY a JSON object with these fields:
- market_overview: string
- key_indicators: object mapping indicator name to {{"value": string, "explanation": string}}
- recent_news: array of strings, one news item each
- industry_trends: object mapping segment name to a trend analysis string
"#
    )
}

fn modeling_prompt(header: &str, perception: &str) -> String {
    format!(
        r#"You are a senior investment strategist. Using the market data below, build an internal model of the market and analyse it in depth.

{header}

MARKET DATA:
{perception}

The model must include:
1. Assessment of the current market state
2. Economic cycle judgement
3. Main risk factors (at least 3)
4. Potential opportunity areas (at least 3)
5. Market sentiment analysis

Return ONLY a JSON object with these fields:
- state: string
- cycle: string
- risks: array of strings
- opportunities: array of strings
- sentiment: string
"#
    )
}

fn reasoning_prompt(header: &str, world_model: &str) -> String {
    format!(
        r#"You are a strategic investment adviser. Based on the market model below, generate 3 different investment analysis plans.

{header}

MARKET MODEL:
{world_model}

For each plan provide:
1. A short plan identifier
2. The investment hypothesis
3. The analysis approach
4. The expected outcome
5. A confidence level between 0 and 1
6. Strengths (at least 3)
7. Weaknesses (at least 2)

The plans must differ clearly from each other, representing distinct investment theses or analytical angles.

Return ONLY a JSON array; each element has these fields:
- id: string
- hypothesis: string
- approach: string
- expected_outcome: string
- confidence: number
- pros: array of strings
- cons: array of strings
"#
    )
}

fn decision_prompt(header: &str, world_model: &str, plans: &str) -> String {
    format!(
        r#"You chair an investment decision committee. Evaluate the candidate analysis plans below, select the best one and form an investment decision.

{header}

MARKET MODEL:
{world_model}

CANDIDATE PLANS:
{plans}

Weigh each plan's hypothesis, approach, expected outcome, confidence, strengths and weaknesses, and give detailed reasons for your choice. Balance return potential, risk level and fit with the time horizon. The selected_plan_id must be the id of one of the candidate plans.

Return ONLY a JSON object with these fields:
- selected_plan_id: string
- thesis: string
- evidence: array of strings
- risk_assessment: string
- recommendation: string
- timeframe: string
"#
    )
}

fn report_prompt(header: &str, perception: &str, world_model: &str, decision: &str) -> String {
    format!(
        r#"You are a professional investment research writer. Produce a complete investment research report from the information below.

{header}

MARKET DATA:
{perception}

MARKET MODEL:
{world_model}

SELECTED INVESTMENT DECISION:
{decision}

The report should be well structured and logically clear, including at least:
1. Title and executive summary
2. Market and industry background
3. Core investment view
4. Detailed supporting analysis
5. Risk factors
6. Investment recommendation
7. Timeframe and expected return

Keep it professional and objective while offering real analytical depth.
"#
    )
}
