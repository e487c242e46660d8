//! Numeric scoring for completed task attempts.
//!
//! Three axes (accuracy, naturalness, efficiency) start at 100 and take
//! additive deductions; clamping happens only at the end so every
//! deduction stays individually traceable. Overall weights correctness
//! over style over speed: 0.5 / 0.3 / 0.2.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::outcome::{find_fallback_phrase, has_evidence, or_group_matches};
use crate::spec::TaskSpec;
use crate::telemetry::TurnMetrics;

/// Final texts at or below this many chars can still be preamble-only.
const PREAMBLE_MAX_CHARS: usize = 180;
/// Sentences shorter than this never count toward repetition.
const SENTENCE_MIN_CHARS: usize = 8;
/// Repetition deduction cap.
const REPETITION_PENALTY_CAP: f64 = 36.0;

/// Openers that suggest the agent never got past its preamble.
const PREAMBLE_MARKERS: &[&str] = &[
    "sure", "okay", "ok,", "alright", "let me", "i will", "i'll", "first,", "好的", "让我",
];

/// Words that mark a real final answer, killing the preamble heuristic.
const FINAL_CUE_WORDS: &[&str] = &[
    "conclusion",
    "result",
    "answer",
    "summary",
    "done",
    "completed",
    "fixed",
    "passed",
    "结论",
    "完成",
];

/// Per-axis score, each clamped to [0, 100] and rounded to 2 decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub accuracy: f64,
    pub natural: f64,
    pub efficiency: f64,
    pub overall: f64,
}

impl ScoreBreakdown {
    /// All-zero score for attempts that never produced a usable run.
    pub fn zero() -> Self {
        Self::default()
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn clamp_axis(value: f64) -> f64 {
    round2(value.clamp(0.0, 100.0))
}

/// Score one completed task attempt.
pub fn score_task(
    task: &TaskSpec,
    workspace: &str,
    final_text: &str,
    turns: &[TurnMetrics],
    duration_total_ms: u64,
) -> ScoreBreakdown {
    let text = final_text.trim();
    let text_lower = text.to_lowercase();

    let mut accuracy = 100.0f64;
    let mut natural = 100.0f64;
    let mut efficiency = 100.0f64;

    for group in &task.must_contain {
        if !or_group_matches(group, &text_lower) {
            accuracy -= 15.0;
        }
    }
    for forbidden in &task.forbidden {
        let forbidden = forbidden.trim().to_lowercase();
        if !forbidden.is_empty() && text_lower.contains(&forbidden) {
            accuracy -= 35.0;
            natural -= 20.0;
        }
    }
    if task.require_evidence && !has_evidence(workspace, &text_lower) {
        accuracy -= 28.0;
    }
    if text.chars().count() < 40 {
        accuracy -= 18.0;
        natural -= 15.0;
    }
    if find_fallback_phrase(&text_lower).is_some() {
        accuracy -= 40.0;
        natural -= 25.0;
    }

    for turn in turns {
        if !turn.monitor_abort.is_empty() {
            accuracy -= 20.0;
            natural -= 20.0;
            efficiency -= 25.0;
        }
        if turn.loop_exhausted {
            accuracy -= 35.0;
            natural -= 20.0;
            efficiency -= 25.0;
        }
        if turn.phase_pingpong {
            accuracy -= 28.0;
            natural -= 20.0;
            efficiency -= 18.0;
        }
        if !turn.run_error.is_empty() {
            accuracy -= 18.0;
            efficiency -= 18.0;
        }
    }

    if looks_preamble_only(text, &text_lower) {
        natural -= 35.0;
    }
    natural -= repetition_penalty(&text_lower);

    let total_seconds = duration_total_ms as f64 / 1000.0;
    efficiency -= (total_seconds * 1.2).min(55.0);

    let turn_count = turns.len() as u32;
    let total_attempts: u32 = turns.iter().map(|t| t.attempts).sum();
    let total_tool_calls: u32 = turns.iter().map(|t| t.tool_calls).sum();
    let total_tool_errors: u32 = turns.iter().map(|t| t.tool_errors).sum();

    efficiency -= 9.0 * f64::from(total_attempts.saturating_sub(turn_count));
    efficiency -= 3.0 * f64::from(total_tool_calls.saturating_sub(5));
    efficiency -= 5.0 * f64::from(total_tool_errors);

    let accuracy = clamp_axis(accuracy);
    let natural = clamp_axis(natural);
    let efficiency = clamp_axis(efficiency);
    let overall = clamp_axis(0.5 * accuracy + 0.3 * natural + 0.2 * efficiency);

    ScoreBreakdown {
        accuracy,
        natural,
        efficiency,
        overall,
    }
}

/// Short text that opens like a preamble and never reaches an answer cue.
fn looks_preamble_only(text: &str, text_lower: &str) -> bool {
    if text.chars().count() > PREAMBLE_MAX_CHARS {
        return false;
    }
    if !PREAMBLE_MARKERS
        .iter()
        .any(|marker| text_lower.starts_with(marker))
    {
        return false;
    }
    !FINAL_CUE_WORDS.iter().any(|cue| text_lower.contains(cue))
}

/// 6 points per duplicated sentence, capped at 36. Sentences split on
/// terminators; fragments under 8 chars are too generic to count.
fn repetition_penalty(text_lower: &str) -> f64 {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut total = 0u32;
    for sentence in text_lower.split(['.', '!', '?', '。', '！', '？', '\n']) {
        let sentence = sentence.trim();
        if sentence.chars().count() < SENTENCE_MIN_CHARS {
            continue;
        }
        *counts.entry(sentence).or_insert(0) += 1;
        total += 1;
    }
    let duplicates = total - counts.len() as u32;
    (6.0 * f64::from(duplicates)).min(REPETITION_PENALTY_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Stage, TaskSpec};

    fn task() -> TaskSpec {
        TaskSpec {
            id: "score-task".to_string(),
            stage: Stage::Screen,
            turns: vec!["do the thing".to_string()],
            ..TaskSpec::default()
        }
    }

    fn clean_turn() -> TurnMetrics {
        TurnMetrics {
            attempts: 1,
            tool_calls: 2,
            ..TurnMetrics::default()
        }
    }

    const GOOD_TEXT: &str =
        "The result is correct: the fix lives in src/parser.go and all checks completed cleanly.";

    #[test]
    fn test_clean_run_scores_high() {
        let score = score_task(&task(), "/ws", GOOD_TEXT, &[clean_turn()], 2_000);
        assert_eq!(score.accuracy, 100.0);
        assert_eq!(score.natural, 100.0);
        // 2s elapsed costs 2.4 efficiency.
        assert_eq!(score.efficiency, 97.6);
        assert_eq!(score.overall, 99.52);
    }

    #[test]
    fn test_missing_must_contain_groups() {
        let mut spec = task();
        spec.must_contain = vec!["alpha|beta".to_string(), "gamma".to_string()];
        let score = score_task(&spec, "/ws", GOOD_TEXT, &[clean_turn()], 0);
        // Two missing groups at 15 each.
        assert_eq!(score.accuracy, 70.0);
    }

    #[test]
    fn test_fallback_and_loop_penalties_stack() {
        let mut spec = task();
        spec.require_evidence = true;
        let turn = TurnMetrics {
            loop_exhausted: true,
            monitor_abort: "repeated_delta".to_string(),
            ..clean_turn()
        };
        let text = "I have reached the current automatic loop limit.";
        let score = score_task(&spec, "/ws", text, &[turn], 0);
        // 28 evidence + 40 fallback + 20 abort + 35 loop off accuracy.
        assert_eq!(score.accuracy, 0.0);
        // 25 fallback + 20 abort + 20 loop.
        assert_eq!(score.natural, 35.0);
        // 25 abort + 25 loop.
        assert_eq!(score.efficiency, 50.0);
    }

    #[test]
    fn test_axes_always_clamped() {
        let mut spec = task();
        spec.must_contain = (0..20).map(|i| format!("token{}", i)).collect();
        spec.forbidden = vec!["bad".to_string()];
        spec.require_evidence = true;
        let turns: Vec<TurnMetrics> = (0..6)
            .map(|_| TurnMetrics {
                attempts: 4,
                tool_calls: 30,
                tool_errors: 9,
                loop_exhausted: true,
                phase_pingpong: true,
                monitor_abort: "repeated_delta".to_string(),
                run_error: "err".to_string(),
                ..TurnMetrics::default()
            })
            .collect();
        let score = score_task(&spec, "/ws", "bad", &turns, 3_600_000);
        assert_eq!(score.accuracy, 0.0);
        assert_eq!(score.natural, 0.0);
        assert_eq!(score.efficiency, 0.0);
        assert_eq!(score.overall, 0.0);
    }

    #[test]
    fn test_short_text_penalty() {
        let score = score_task(&task(), "/ws", "The result is done", &[clean_turn()], 0);
        // Under 40 code points: 18 accuracy, 15 natural.
        assert_eq!(score.accuracy, 82.0);
        assert_eq!(score.natural, 85.0);
    }

    #[test]
    fn test_preamble_only_detection() {
        assert!(looks_preamble_only(
            "Sure, let me take a look at that for you",
            "sure, let me take a look at that for you"
        ));
        // A cue word rescues it.
        assert!(!looks_preamble_only(
            "Sure. The answer is 42",
            "sure. the answer is 42"
        ));
        // Long texts are never preamble-only.
        let long = "let me ".repeat(40);
        assert!(!looks_preamble_only(&long, &long));
    }

    #[test]
    fn test_repetition_penalty_caps() {
        let repeated = "this sentence repeats itself verbatim. ".repeat(12);
        assert_eq!(repetition_penalty(&repeated.to_lowercase()), 36.0);
        assert_eq!(
            repetition_penalty("one unique sentence here. another different one."),
            0.0
        );
        // Duplicate short fragments are ignored.
        assert_eq!(repetition_penalty("ok. ok. ok. ok."), 0.0);
    }

    #[test]
    fn test_efficiency_deductions() {
        let turns = vec![
            TurnMetrics {
                attempts: 3,
                tool_calls: 6,
                tool_errors: 2,
                ..TurnMetrics::default()
            },
            TurnMetrics {
                attempts: 1,
                tool_calls: 3,
                ..TurnMetrics::default()
            },
        ];
        let score = score_task(&task(), "/ws", GOOD_TEXT, &turns, 10_000);
        // 12 time + 18 extra attempts + 12 extra tool calls + 10 errors.
        assert_eq!(score.efficiency, 48.0);
    }

    #[test]
    fn test_time_penalty_caps_at_55() {
        let score = score_task(&task(), "/ws", GOOD_TEXT, &[clean_turn()], 600_000);
        assert_eq!(score.efficiency, 45.0);
    }
}
