//! The in-memory evaluation report.
//!
//! Encoding to JSON/Markdown is presentation and lives outside the core;
//! the contract ends at this value. The fingerprint makes two reports
//! over the same summary table comparable at a glance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::gate::GateReport;
use crate::pipeline::{TaskResult, VariantMetrics};

/// Per-variant view of the two-stage evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant_id: String,
    pub stage1_avg: f64,
    /// Forced to 0 for variants that were never promoted.
    pub stage2_avg: f64,
    pub promoted: bool,
    pub final_overall: f64,
}

/// Everything one evaluation run produced.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub workspace: String,
    /// Sorted by final overall descending, ties by ascending variant id.
    pub summaries: Vec<VariantSummary>,
    pub metrics: BTreeMap<String, VariantMetrics>,
    pub results: Vec<TaskResult>,
    pub recommended_variant_id: String,
    pub gate: GateReport,
    pub fingerprint: String,
}

impl EvaluationReport {
    pub fn new(
        workspace: String,
        summaries: Vec<VariantSummary>,
        metrics: BTreeMap<String, VariantMetrics>,
        results: Vec<TaskResult>,
        gate: GateReport,
    ) -> Self {
        let recommended_variant_id = summaries
            .first()
            .map(|summary| summary.variant_id.clone())
            .unwrap_or_default();
        let fingerprint = fingerprint_summaries(&summaries);
        Self {
            generated_at: Utc::now(),
            workspace,
            summaries,
            metrics,
            results,
            recommended_variant_id,
            gate,
            fingerprint,
        }
    }
}

/// Sha256 over the ordered summary table.
pub fn fingerprint_summaries(summaries: &[VariantSummary]) -> String {
    let mut hasher = Sha256::new();
    for summary in summaries {
        hasher.update(summary.variant_id.as_bytes());
        hasher.update(summary.stage1_avg.to_le_bytes());
        hasher.update(summary.stage2_avg.to_le_bytes());
        hasher.update([u8::from(summary.promoted)]);
        hasher.update(summary.final_overall.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, final_overall: f64) -> VariantSummary {
        VariantSummary {
            variant_id: id.to_string(),
            stage1_avg: 50.0,
            stage2_avg: 0.0,
            promoted: false,
            final_overall,
        }
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = vec![summary("v1", 20.0), summary("v2", 10.0)];
        let b = vec![summary("v1", 20.0), summary("v2", 10.0)];
        assert_eq!(fingerprint_summaries(&a), fingerprint_summaries(&b));

        let c = vec![summary("v1", 20.0), summary("v2", 10.01)];
        assert_ne!(fingerprint_summaries(&a), fingerprint_summaries(&c));
    }

    #[test]
    fn test_recommended_is_top_summary() {
        let report = EvaluationReport::new(
            "/ws".to_string(),
            vec![summary("best", 90.0), summary("worst", 10.0)],
            BTreeMap::new(),
            Vec::new(),
            GateReport::skipped(),
        );
        assert_eq!(report.recommended_variant_id, "best");
        assert_eq!(report.fingerprint.len(), 64);
    }
}
