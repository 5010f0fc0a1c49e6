use clap::Parser;
use deliberative_research::{
    build_completion_service, Artifact, CompletionConfig, Orchestrator, PipelineConfig, Request,
};
use std::env;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Run one deliberative research pipeline and print the result.
#[derive(Parser, Debug)]
#[command(name = "research", version, about)]
struct Cli {
    /// Research topic, e.g. "new energy"
    #[arg(long, requires_all = ["focus", "horizon"], conflicts_with = "query")]
    topic: Option<String>,

    /// Industry focus
    #[arg(long)]
    focus: Option<String>,

    /// Time horizon, e.g. "medium-term"
    #[arg(long)]
    horizon: Option<String>,

    /// Combined "topic,focus,horizon" form
    #[arg(long, short)]
    query: Option<String>,

    /// Completion provider (gemini | openai); overrides RESEARCH_PROVIDER
    #[arg(long, env = "RESEARCH_PROVIDER")]
    provider: Option<String>,

    /// Model name; overrides RESEARCH_MODEL
    #[arg(long)]
    model: Option<String>,

    /// Print the full artifact as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn request(&self) -> deliberative_research::Result<Request> {
        match (&self.query, &self.topic, &self.focus, &self.horizon) {
            (Some(query), _, _, _) => Request::parse_triplet(query),
            (None, Some(topic), Some(focus), Some(horizon)) => {
                Request::new(topic.as_str(), focus.as_str(), horizon.as_str())
            }
            _ => Err(deliberative_research::PipelineError::InvalidRequest(
                "pass --query or all of --topic, --focus and --horizon".to_string(),
            )),
        }
    }

    fn completion_config(&self) -> deliberative_research::Result<CompletionConfig> {
        dotenv::dotenv().ok();
        CompletionConfig::from_lookup(|key| match key {
            "RESEARCH_PROVIDER" => self.provider.clone().or_else(|| env::var(key).ok()),
            "RESEARCH_MODEL" => self.model.clone().or_else(|| env::var(key).ok()),
            _ => env::var(key).ok(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let request = cli.request()?;
    let config = cli.completion_config()?;

    info!(
        provider = %config.provider,
        model = %config.model,
        "Deliberative research starting"
    );
    if config.api_key.is_empty() {
        warn!(provider = %config.provider, "No API key configured; requests may be rejected");
    }

    let service = build_completion_service(&config)?;
    let orchestrator = Orchestrator::new(service, PipelineConfig::default());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current stage");
            on_signal.cancel();
        }
    });

    match orchestrator.run_with_cancel(request, &cancel).await {
        Ok(artifact) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                print_artifact(&artifact);
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}

fn print_artifact(artifact: &Artifact) {
    println!("\n=== RESEARCH REPORT ===\n");
    println!("{}", artifact.report);

    println!("\n=== DECISION ===");
    println!("Run ID: {}", artifact.run_id);
    println!(
        "Selected plan: {} (candidates: {})",
        artifact.decision.selected_plan_id,
        artifact.candidate_plan_ids.join(", ")
    );
    println!("Thesis: {}", artifact.decision.thesis);
    println!("Recommendation: {}", artifact.decision.recommendation);
    println!("Risk: {}", artifact.decision.risk_assessment);
    println!("Timeframe: {}", artifact.decision.timeframe);

    if !artifact.quality.issues.is_empty() {
        println!("\n=== QUALITY ISSUES ===");
        for issue in &artifact.quality.issues {
            println!(
                "  [{:?}] {} ({}): {:?}",
                issue.severity, issue.rule, issue.stage, issue.kind
            );
        }
    }

    println!("\nReasoning Trace:");
    for (i, trace) in artifact.reasoning_trace.iter().enumerate() {
        println!("  {}: {}", i + 1, trace);
    }
    println!("\nCompleted in {} ms", artifact.elapsed_ms);
}
