//! Deliberative Research Pipeline
//!
//! Turns a research request (topic, industry focus, time horizon) into an
//! investment decision and a long-form report by chaining four completion
//! calls:
//! - perceives the market and collects indicators, news and trends
//! - models the market state, cycle, risks and opportunities
//! - reasons out several distinct candidate plans
//! - decides on one plan and writes the report
//!
//! Unreliable model output never aborts a run: every stage degrades to a
//! visibly marked sentinel record, and a quality audit reports what degraded.
//!
//! PIPELINE:
//! PERCEPTION → MODELING → REASONING → DECISION/REPORT → DONE

pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod extraction;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod quality;
pub mod stages;

pub use error::{PipelineError, Result, TransportError};

// Re-export common types
pub use completion::{build_completion_service, CompletionService};
pub use config::{CompletionConfig, GenerationParams, PipelineConfig, Provider};
pub use models::*;
pub use orchestrator::{Orchestrator, PipelineState};
pub use quality::{QualityIssue, QualityReport, Severity};
