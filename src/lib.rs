//! Reliability evaluation and gating for autonomous coding agents.
//!
//! Loopgate watches live agent runs for pathological loops, classifies
//! and scores completed task attempts, screens configuration variants in
//! two stages, and gates which variant is safe to recommend relative to
//! benchmark baselines.
//!
//! ## Flow
//!
//! ```text
//! live stream ──▶ StreamMonitor ──▶ abort signal (cooperative cancel)
//!
//! final text + turn telemetry ──▶ assess_task_outcome ──▶ TaskOutcome
//!                            └──▶ score_task ──────────▶ ScoreBreakdown
//!
//! VariantPipeline: stage 1 (screen, all variants)
//!                  └─▶ top-K ─▶ stage 2 (deep) ─▶ summaries + metrics
//!
//! GateEngine: thresholds + reference-best baselines ─▶ GateReport
//! ```
//!
//! The run-execution backend (threads, streaming, tool approval) is an
//! external collaborator behind [`runner::RunExecutor`]; everything else
//! here is pure computation over collected data.

pub mod errors;
pub mod events;
pub mod gate;
pub mod monitor;
pub mod outcome;
pub mod pipeline;
pub mod profiles;
pub mod report;
pub mod runner;
pub mod scoring;
pub mod spec;
pub mod telemetry;

pub use errors::ConfigError;
pub use events::{BlockPayload, StreamEvent};
pub use gate::{
    evaluate_gate, BaselineSource, BenchmarkBaselines, GateDecision, GateReport, GateStatus,
    GateThresholds,
};
pub use monitor::{StreamMonitor, ABORT_REPEATED_DELTA, ABORT_TOOL_SIGNATURE_LOOP};
pub use outcome::{assess_task_outcome, TaskOutcome};
pub use pipeline::{
    aggregate_metrics, pick_top_variants, summarize_variants, PipelineConfig, TaskResult,
    TwoStageOutcome, VariantMetrics, VariantPipeline,
};
pub use profiles::{
    build_variants, build_variants_capped, LoopProfile, PromptProfile, Variant, LOOP_PROFILES,
    MIN_VARIANT_POPULATION, PROMPT_PROFILES,
};
pub use report::{EvaluationReport, VariantSummary};
pub use runner::{
    LoopSettings, RunEvent, RunExecutor, RunMeta, RunRequest, StreamSink, ThreadMessage,
};
pub use scoring::{score_task, ScoreBreakdown};
pub use spec::{Stage, TaskSpec, TaskSpecFile};
pub use telemetry::{fold_run_events, TurnMetrics};
