//! Baseline-relative accept/reject gate.
//!
//! A variant passes only when it clears four absolute floors and matches
//! or beats the reference-best composite on every tracked metric. The
//! reference best takes each metric's maximum across all baseline
//! sources independently, so the composite can be stricter than any
//! single source's holistic profile.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::errors::ConfigError;
use crate::pipeline::VariantMetrics;

/// One benchmark source's published rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSource {
    pub pass_rate: f64,
    pub loop_safety_rate: f64,
    pub recovery_success_rate: f64,
    pub fallback_free_rate: f64,
    pub average_accuracy: f64,
}

/// All configured benchmark sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkBaselines {
    pub sources: BTreeMap<String, BaselineSource>,
}

impl BenchmarkBaselines {
    /// Load and validate a baselines file; an empty source map is fatal.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(Path::new(path)).map_err(|source| {
            ConfigError::Read {
                path: path.to_string(),
                source,
            }
        })?;
        let baselines: BenchmarkBaselines =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_string(),
                source,
            })?;
        baselines.validate()?;
        info!(path, sources = baselines.sources.len(), "loaded baselines");
        Ok(baselines)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoBaselineSources);
        }
        Ok(())
    }

    /// Per-metric maximum across all sources.
    pub fn reference_best(&self) -> BaselineSource {
        let mut best = BaselineSource::default();
        for source in self.sources.values() {
            best.pass_rate = best.pass_rate.max(source.pass_rate);
            best.loop_safety_rate = best.loop_safety_rate.max(source.loop_safety_rate);
            best.recovery_success_rate =
                best.recovery_success_rate.max(source.recovery_success_rate);
            best.fallback_free_rate = best.fallback_free_rate.max(source.fallback_free_rate);
            best.average_accuracy = best.average_accuracy.max(source.average_accuracy);
        }
        best
    }
}

/// Absolute minimums a variant must clear regardless of baselines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub min_pass_rate: f64,
    pub min_loop_safety_rate: f64,
    pub min_fallback_free_rate: f64,
    pub min_average_accuracy: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_pass_rate: 0.8,
            min_loop_safety_rate: 0.9,
            min_fallback_free_rate: 0.9,
            min_average_accuracy: 75.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Reject,
    Skipped,
}

/// One variant's gate verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub variant_id: String,
    pub passed: bool,
    pub average_overall: f64,
    /// Empty iff the variant passed.
    pub reasons: Vec<String>,
}

/// The gate's terminal verdict over a whole evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub status: GateStatus,
    /// Sorted by average overall descending, ties by ascending id.
    /// Ordering is independent of pass/fail.
    pub decisions: Vec<GateDecision>,
    pub passed_variant_ids: Vec<String>,
    pub recommended_variant_id: String,
    /// Best passing variant by average overall, for visibility only; the
    /// gate never silently substitutes it for the recommendation.
    pub best_passing_variant_id: Option<String>,
    pub fail_reasons: Vec<String>,
}

impl GateReport {
    /// Report for a run where gating was not requested.
    pub fn skipped() -> Self {
        Self {
            status: GateStatus::Skipped,
            decisions: Vec::new(),
            passed_variant_ids: Vec::new(),
            recommended_variant_id: String::new(),
            best_passing_variant_id: None,
            fail_reasons: Vec::new(),
        }
    }
}

fn decide_variant(
    variant_id: &str,
    metrics: &VariantMetrics,
    thresholds: &GateThresholds,
    reference: &BaselineSource,
) -> GateDecision {
    let mut reasons = Vec::new();

    if metrics.pass_rate < thresholds.min_pass_rate {
        reasons.push("pass_rate_below_threshold".to_string());
    }
    if metrics.loop_safety_rate < thresholds.min_loop_safety_rate {
        reasons.push("loop_safety_rate_below_threshold".to_string());
    }
    if metrics.fallback_free_rate < thresholds.min_fallback_free_rate {
        reasons.push("fallback_free_rate_below_threshold".to_string());
    }
    if metrics.average_accuracy < thresholds.min_average_accuracy {
        reasons.push("average_accuracy_below_threshold".to_string());
    }

    if metrics.pass_rate < reference.pass_rate {
        reasons.push("pass_rate_below_reference_best".to_string());
    }
    if metrics.loop_safety_rate < reference.loop_safety_rate {
        reasons.push("loop_safety_rate_below_reference_best".to_string());
    }
    if metrics.recovery_success_rate < reference.recovery_success_rate {
        reasons.push("recovery_success_rate_below_reference_best".to_string());
    }
    if metrics.fallback_free_rate < reference.fallback_free_rate {
        reasons.push("fallback_free_rate_below_reference_best".to_string());
    }
    if metrics.average_accuracy < reference.average_accuracy {
        reasons.push("average_accuracy_below_reference_best".to_string());
    }

    GateDecision {
        variant_id: variant_id.to_string(),
        passed: reasons.is_empty(),
        average_overall: metrics.average_overall,
        reasons,
    }
}

/// Render the gate verdict for a set of variants.
///
/// `recommended` is the externally-nominated best variant (top final
/// overall); if it fails the gate the whole run is rejected even when
/// other variants pass.
pub fn evaluate_gate(
    variant_ids: &[String],
    metrics: &HashMap<String, VariantMetrics>,
    baselines: &BenchmarkBaselines,
    thresholds: &GateThresholds,
    recommended: &str,
) -> GateReport {
    let reference = baselines.reference_best();

    let mut decisions: Vec<GateDecision> = variant_ids
        .iter()
        .map(|variant_id| match metrics.get(variant_id) {
            Some(metrics) => decide_variant(variant_id, metrics, thresholds, &reference),
            None => GateDecision {
                variant_id: variant_id.clone(),
                passed: false,
                average_overall: 0.0,
                reasons: vec!["missing_variant_metrics".to_string()],
            },
        })
        .collect();

    decisions.sort_by(|a, b| {
        b.average_overall
            .partial_cmp(&a.average_overall)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.variant_id.cmp(&b.variant_id))
    });

    let passed_variant_ids: Vec<String> = decisions
        .iter()
        .filter(|decision| decision.passed)
        .map(|decision| decision.variant_id.clone())
        .collect();
    let best_passing_variant_id = passed_variant_ids.first().cloned();

    let (status, fail_reasons) = if passed_variant_ids.is_empty() {
        (
            GateStatus::Reject,
            vec!["no_variant_passed_hard_gate".to_string()],
        )
    } else if !passed_variant_ids.iter().any(|id| id == recommended) {
        (
            GateStatus::Reject,
            vec![format!("recommended_variant_{}_failed_gate", recommended)],
        )
    } else {
        (GateStatus::Pass, Vec::new())
    };

    info!(
        status = ?status,
        passed = passed_variant_ids.len(),
        total = decisions.len(),
        "gate evaluated"
    );

    GateReport {
        status,
        decisions,
        passed_variant_ids,
        recommended_variant_id: recommended.to_string(),
        best_passing_variant_id,
        fail_reasons,
    }
}
