//! Two-stage variant evaluation.
//!
//! The pipeline drives every (variant × task) execution strictly
//! sequentially: the backend is a shared, stateful, interactive service,
//! so there is no cross-variant or cross-task parallelism, and turns
//! within one task share a single conversation thread in order. Stage 1
//! screens the whole population on the cheap task subset; only the top-K
//! by screen score graduate to the thorough deep subset.
//!
//! Execution failures never abort the batch: the whole point is to
//! characterize failure modes across the full matrix, so a run that
//! cannot start becomes a zero-score result and the loop moves on.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::monitor::StreamMonitor;
use crate::outcome::{assess_task_outcome, TaskOutcome};
use crate::profiles::{self, Variant};
use crate::report::VariantSummary;
use crate::runner::{RunExecutor, RunMeta, RunRequest};
use crate::scoring::{round2, score_task, ScoreBreakdown};
use crate::spec::TaskSpec;
use crate::telemetry::{fold_run_events, TurnMetrics};

/// One (variant, task) execution with everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub variant_id: String,
    pub task_id: String,
    pub turns: Vec<TurnMetrics>,
    pub final_text: String,
    pub duration_total_ms: u64,
    pub score: ScoreBreakdown,
    pub outcome: TaskOutcome,
}

/// Aggregated rates and averages over one variant's task results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub pass_rate: f64,
    pub loop_safety_rate: f64,
    pub fallback_free_rate: f64,
    /// Defaults to 1.0 when no task produced a recovery candidate;
    /// absence of evidence is not evidence of failed recovery.
    pub recovery_success_rate: f64,
    pub average_accuracy: f64,
    pub average_natural: f64,
    pub average_efficiency: f64,
    pub average_overall: f64,
    pub task_count: usize,
}

/// What the two-stage flow produced, before summarization.
#[derive(Debug, Clone, Default)]
pub struct TwoStageOutcome {
    /// Variant id → mean overall on the screen subset.
    pub stage1: BTreeMap<String, f64>,
    /// Variant id → mean overall on the deep subset (promoted only).
    pub stage2: BTreeMap<String, f64>,
    pub promoted: Vec<String>,
    pub results: Vec<TaskResult>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workspace path substituted into turn templates.
    pub workspace: String,
    /// Variants promoted from stage 1 to stage 2; 0 promotes all.
    pub stage1_top_k: usize,
    /// Event-log page size requested per run.
    pub run_event_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: ".".to_string(),
            stage1_top_k: 6,
            run_event_limit: 500,
        }
    }
}

/// Drives (variant × task) executions against the run backend.
pub struct VariantPipeline {
    executor: Arc<dyn RunExecutor>,
    config: PipelineConfig,
}

impl VariantPipeline {
    pub fn new(executor: Arc<dyn RunExecutor>, config: PipelineConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one task against one variant.
    ///
    /// Turns run sequentially on one thread; each turn gets a fresh
    /// monitor tapping its response stream. Backend failures are folded
    /// into the result, never returned.
    pub async fn run_task(&self, variant: &Variant, task: &TaskSpec) -> TaskResult {
        let start = Instant::now();
        let mut meta = RunMeta {
            thread_id: String::new(),
            variant_id: variant.id.clone(),
            task_id: task.id.clone(),
            workspace: self.config.workspace.clone(),
        };

        let thread_id = match self.executor.create_thread(&meta).await {
            Ok(thread_id) => thread_id,
            Err(err) => {
                warn!(variant = %variant.id, task = %task.id, %err, "thread allocation failed");
                return self.failed_result(variant, task, start, format!("create_thread: {err}"));
            }
        };
        meta.thread_id = thread_id.clone();

        let system_prompt = profiles::prompt_profile(&variant.prompt_profile)
            .map(|profile| profile.system_prompt)
            .unwrap_or_default();
        let loop_settings = profiles::loop_profile(&variant.loop_profile)
            .map(|profile| profile.settings())
            .unwrap_or_default();

        let mut turns = Vec::with_capacity(task.turns.len());
        for template in &task.turns {
            let request = RunRequest {
                prompt: task.render_turn(template, &self.config.workspace),
                system_prompt: system_prompt.to_string(),
                loop_settings,
                max_steps: task.max_steps,
                timeout: Duration::from_secs(task.timeout_seconds),
            };
            let run_id = Uuid::new_v4().to_string();
            let monitor = Arc::new(StreamMonitor::new(
                Arc::clone(&self.executor),
                meta.clone(),
                run_id.clone(),
            ));
            let cancel = monitor.cancellation_token();
            let mut sink = Arc::clone(&monitor);

            let run_result = self
                .executor
                .start_run(cancel, &meta, &run_id, &request, &mut sink)
                .await;

            let abort_reason = monitor.abort_state();
            let mut metrics = match self
                .executor
                .list_run_events(&meta, &run_id, self.config.run_event_limit)
                .await
            {
                Ok(events) => fold_run_events(&events),
                Err(err) => {
                    warn!(run_id = %run_id, %err, "event log unavailable");
                    TurnMetrics::default()
                }
            };
            if let Err(err) = run_result {
                // A monitor abort surfaces as monitor_abort, not as a
                // second failure signal.
                if abort_reason.is_empty() {
                    metrics.run_error = err.to_string();
                }
            }
            metrics.monitor_abort = abort_reason;
            turns.push(metrics);
        }

        let final_text = match self.executor.list_thread_messages(&meta, &thread_id).await {
            Ok(messages) => messages
                .iter()
                .rev()
                .find(|message| message.role == "assistant")
                .map(|message| message.content.clone())
                .unwrap_or_default(),
            Err(err) => {
                warn!(thread_id = %thread_id, %err, "transcript unavailable");
                String::new()
            }
        };

        let duration_total_ms = start.elapsed().as_millis() as u64;
        let score = score_task(
            task,
            &self.config.workspace,
            &final_text,
            &turns,
            duration_total_ms,
        );
        let outcome = assess_task_outcome(task, &self.config.workspace, &final_text, &turns);

        TaskResult {
            variant_id: variant.id.clone(),
            task_id: task.id.clone(),
            turns,
            final_text,
            duration_total_ms,
            score,
            outcome,
        }
    }

    /// Zero-score result for a task whose run never started.
    fn failed_result(
        &self,
        variant: &Variant,
        task: &TaskSpec,
        start: Instant,
        error: String,
    ) -> TaskResult {
        let turns = vec![TurnMetrics::from_run_error(error)];
        let outcome = assess_task_outcome(task, &self.config.workspace, "", &turns);
        TaskResult {
            variant_id: variant.id.clone(),
            task_id: task.id.clone(),
            turns,
            final_text: String::new(),
            duration_total_ms: start.elapsed().as_millis() as u64,
            score: ScoreBreakdown::zero(),
            outcome,
        }
    }

    /// Run a task set sequentially; returns the mean overall plus the raw
    /// results.
    pub async fn run_variant_tasks(
        &self,
        variant: &Variant,
        tasks: &[&TaskSpec],
    ) -> (f64, Vec<TaskResult>) {
        let mut results = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let result = self.run_task(variant, task).await;
            info!(
                variant = %variant.id,
                task = %task.id,
                index = index + 1,
                total = tasks.len(),
                overall = result.score.overall,
                passed = result.outcome.passed,
                "task evaluated"
            );
            results.push(result);
        }
        (mean_overall(&results), results)
    }

    /// Stage 1 screens every variant; stage 2 deep-evaluates the top-K.
    pub async fn run_two_stage(
        &self,
        variants: &[Variant],
        screen_tasks: &[&TaskSpec],
        deep_tasks: &[&TaskSpec],
    ) -> TwoStageOutcome {
        let mut outcome = TwoStageOutcome::default();

        info!(
            variants = variants.len(),
            tasks = screen_tasks.len(),
            "stage 1: screening all variants"
        );
        for variant in variants {
            let (avg, mut results) = self.run_variant_tasks(variant, screen_tasks).await;
            outcome.stage1.insert(variant.id.clone(), avg);
            outcome.results.append(&mut results);
        }

        let scores: Vec<(String, f64)> = outcome
            .stage1
            .iter()
            .map(|(id, avg)| (id.clone(), *avg))
            .collect();
        outcome.promoted = pick_top_variants(&scores, self.config.stage1_top_k);

        info!(
            promoted = outcome.promoted.len(),
            tasks = deep_tasks.len(),
            "stage 2: deep evaluation of promoted variants"
        );
        for variant in variants {
            if !outcome.promoted.contains(&variant.id) {
                continue;
            }
            let (avg, mut results) = self.run_variant_tasks(variant, deep_tasks).await;
            outcome.stage2.insert(variant.id.clone(), avg);
            outcome.results.append(&mut results);
        }

        outcome
    }
}

fn mean_overall(results: &[TaskResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.iter().map(|result| result.score.overall).sum();
    round2(sum / results.len() as f64)
}

/// Top-K variant ids by score, descending, ties broken by ascending id.
/// `k` of 0 or beyond the population returns everything (still sorted).
pub fn pick_top_variants(scores: &[(String, f64)], k: usize) -> Vec<String> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let take = if k == 0 || k > sorted.len() {
        sorted.len()
    } else {
        k
    };
    sorted.into_iter().take(take).map(|(id, _)| id).collect()
}

/// Blend stage averages into the final per-variant ranking.
///
/// Promoted variants blend 0.45 screen / 0.55 deep; screen-only variants
/// keep 0.4 of their screen score with stage-2 forced to zero, so a
/// variant that skipped deep evaluation cannot outrank a promoted one on
/// raw screen score alone.
pub fn summarize_variants(outcome: &TwoStageOutcome) -> Vec<VariantSummary> {
    let mut summaries: Vec<VariantSummary> = outcome
        .stage1
        .iter()
        .map(|(variant_id, stage1_avg)| {
            let promoted = outcome.promoted.contains(variant_id);
            let stage2_avg = if promoted {
                outcome.stage2.get(variant_id).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            let final_overall = if promoted {
                round2((0.45 * stage1_avg + 0.55 * stage2_avg).clamp(0.0, 100.0))
            } else {
                round2((0.4 * stage1_avg).clamp(0.0, 100.0))
            };
            VariantSummary {
                variant_id: variant_id.clone(),
                stage1_avg: *stage1_avg,
                stage2_avg,
                promoted,
                final_overall,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.final_overall
            .partial_cmp(&a.final_overall)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.variant_id.cmp(&b.variant_id))
    });
    summaries
}

/// Fold raw results into per-variant aggregate metrics.
pub fn aggregate_metrics(results: &[TaskResult]) -> BTreeMap<String, VariantMetrics> {
    let mut grouped: BTreeMap<&str, Vec<&TaskResult>> = BTreeMap::new();
    for result in results {
        grouped
            .entry(result.variant_id.as_str())
            .or_default()
            .push(result);
    }

    grouped
        .into_iter()
        .map(|(variant_id, results)| {
            let total = results.len() as f64;
            let rate = |count: usize| round2(count as f64 / total);

            let passed = results.iter().filter(|r| r.outcome.passed).count();
            let loop_safe = results.iter().filter(|r| r.outcome.loop_safe).count();
            let fallback_free = results
                .iter()
                .filter(|r| !r.outcome.fallback_final)
                .count();
            let candidates = results
                .iter()
                .filter(|r| r.outcome.recovery_candidate)
                .count();
            let recovered = results
                .iter()
                .filter(|r| r.outcome.recovery_candidate && r.outcome.recovery_succeeded)
                .count();
            let recovery_success_rate = if candidates == 0 {
                1.0
            } else {
                round2(recovered as f64 / candidates as f64)
            };

            let average = |pick: fn(&ScoreBreakdown) -> f64| {
                round2(results.iter().map(|r| pick(&r.score)).sum::<f64>() / total)
            };

            let metrics = VariantMetrics {
                pass_rate: rate(passed),
                loop_safety_rate: rate(loop_safe),
                fallback_free_rate: rate(fallback_free),
                recovery_success_rate,
                average_accuracy: average(|s| s.accuracy),
                average_natural: average(|s| s.natural),
                average_efficiency: average(|s| s.efficiency),
                average_overall: average(|s| s.overall),
                task_count: results.len(),
            };
            (variant_id.to_string(), metrics)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs
            .iter()
            .map(|(id, score)| (id.to_string(), *score))
            .collect()
    }

    #[test]
    fn test_pick_top_variants_ordering_and_ties() {
        let scores = scores(&[("v_c", 80.0), ("v_a", 90.0), ("v_b", 90.0), ("v_d", 70.0)]);
        assert_eq!(pick_top_variants(&scores, 3), vec!["v_a", "v_b", "v_c"]);
        // k of 0 and oversized k return the whole population.
        assert_eq!(pick_top_variants(&scores, 0).len(), 4);
        assert_eq!(pick_top_variants(&scores, 99).len(), 4);
    }

    #[test]
    fn test_summary_blend_biases_promoted_variants() {
        let mut outcome = TwoStageOutcome::default();
        outcome.stage1.insert("v_deep".to_string(), 70.0);
        outcome.stage1.insert("v_screen".to_string(), 78.0);
        outcome.stage2.insert("v_deep".to_string(), 50.0);
        outcome.promoted = vec!["v_deep".to_string()];

        let summaries = summarize_variants(&outcome);
        assert_eq!(summaries[0].variant_id, "v_deep");
        assert_eq!(summaries[0].final_overall, 59.0);
        assert_eq!(summaries[1].variant_id, "v_screen");
        assert_eq!(summaries[1].stage2_avg, 0.0);
        assert_eq!(summaries[1].final_overall, 31.2);
    }

    #[test]
    fn test_promoted_without_stage2_average_gets_zero() {
        let mut outcome = TwoStageOutcome::default();
        outcome.stage1.insert("v".to_string(), 60.0);
        outcome.promoted = vec!["v".to_string()];
        let summaries = summarize_variants(&outcome);
        assert_eq!(summaries[0].stage2_avg, 0.0);
        assert_eq!(summaries[0].final_overall, 27.0);
    }

    fn result(variant: &str, passed: bool, candidate: bool, succeeded: bool) -> TaskResult {
        TaskResult {
            variant_id: variant.to_string(),
            task_id: "t".to_string(),
            turns: Vec::new(),
            final_text: String::new(),
            duration_total_ms: 0,
            score: ScoreBreakdown {
                accuracy: 80.0,
                natural: 90.0,
                efficiency: 70.0,
                overall: 81.0,
            },
            outcome: TaskOutcome {
                passed,
                loop_safe: passed,
                fallback_final: !passed,
                recovery_candidate: candidate,
                recovery_succeeded: succeeded,
                hard_fail_reasons: Vec::new(),
            },
        }
    }

    #[test]
    fn test_aggregate_metrics_rates() {
        let results = vec![
            result("v", true, true, true),
            result("v", true, false, true),
            result("v", false, true, false),
            result("v", false, false, true),
        ];
        let metrics = aggregate_metrics(&results);
        let v = &metrics["v"];
        assert_eq!(v.pass_rate, 0.5);
        assert_eq!(v.loop_safety_rate, 0.5);
        assert_eq!(v.fallback_free_rate, 0.5);
        // Two candidates, one succeeded.
        assert_eq!(v.recovery_success_rate, 0.5);
        assert_eq!(v.average_accuracy, 80.0);
        assert_eq!(v.average_overall, 81.0);
        assert_eq!(v.task_count, 4);
    }

    #[test]
    fn test_recovery_rate_defaults_to_one_without_candidates() {
        let results = vec![result("v", true, false, true)];
        let metrics = aggregate_metrics(&results);
        assert_eq!(metrics["v"].recovery_success_rate, 1.0);
    }
}
