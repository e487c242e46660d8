//! Post-run pass/fail classification.
//!
//! `assess_task_outcome` is a pure function over the task's criteria, the
//! final assistant text, and the per-turn telemetry. Identical inputs
//! always produce identical outcomes; nothing here touches a clock, the
//! filesystem, or global state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::spec::TaskSpec;
use crate::telemetry::{
    TurnMetrics, EVENT_TASK_LOOP_CONTINUE, EVENT_TURN_COMPLETION_CONTINUE,
    EVENT_TURN_LOOP_EXHAUSTED, FINALIZATION_TASK_TURN_LIMIT,
};

/// Canned low-information closings that mean the agent gave up. Matched as
/// substrings of the lowercased final text.
pub(crate) const FALLBACK_PHRASES: &[&str] = &[
    "i have reached the current automatic loop limit",
    "tool workflow failed",
    "no response",
    "unable to make further progress",
    "i cannot continue with this task",
    "maximum retries exceeded",
];

/// Substrings accepted as evidence that the agent actually looked at the
/// workspace, besides the literal workspace path itself.
const EVIDENCE_HINTS: &[&str] = &[
    "readme", "go.mod", "go.sum", "main.go", "src/", "cmd/", "pkg/",
];

/// Classification of one completed task attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub passed: bool,
    pub loop_safe: bool,
    pub fallback_final: bool,
    pub recovery_candidate: bool,
    pub recovery_succeeded: bool,
    /// Deduped case-insensitively, first-seen order preserved.
    pub hard_fail_reasons: Vec<String>,
}

/// First fallback phrase found in the (lowercased) text, if any.
pub(crate) fn find_fallback_phrase(text_lower: &str) -> Option<&'static str> {
    FALLBACK_PHRASES
        .iter()
        .copied()
        .find(|phrase| text_lower.contains(phrase))
}

/// An OR-group "a|b|c" matches when at least one alternative is present.
pub(crate) fn or_group_matches(group: &str, text_lower: &str) -> bool {
    group
        .split('|')
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .any(|alt| text_lower.contains(&alt.to_lowercase()))
}

/// The text carries the workspace path or one of the fixed evidence hints.
pub(crate) fn has_evidence(workspace: &str, text_lower: &str) -> bool {
    let workspace = workspace.trim().to_lowercase();
    if !workspace.is_empty() && text_lower.contains(&workspace) {
        return true;
    }
    EVIDENCE_HINTS.iter().any(|hint| text_lower.contains(hint))
}

fn push_reason(reasons: &mut Vec<String>, reason: impl Into<String>) {
    reasons.push(reason.into());
}

/// Case-insensitive, order-preserving dedup; empty entries dropped.
fn dedup_reasons(reasons: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for reason in reasons {
        if reason.is_empty() {
            continue;
        }
        if seen.insert(reason.to_lowercase()) {
            out.push(reason);
        }
    }
    out
}

/// Classify one completed task attempt.
pub fn assess_task_outcome(
    task: &TaskSpec,
    workspace: &str,
    final_text: &str,
    turns: &[TurnMetrics],
) -> TaskOutcome {
    let mut passed = true;
    let mut loop_safe = true;
    let mut fallback_final = false;
    let mut recovery_candidate = false;
    let mut reasons: Vec<String> = Vec::new();

    let text_lower = final_text.trim().to_lowercase();

    if find_fallback_phrase(&text_lower).is_some() {
        fallback_final = true;
        passed = false;
        loop_safe = false;
        push_reason(&mut reasons, "fallback_final_message");
    }

    let hard_fail_events: HashSet<String> = task
        .hard_fail_events
        .iter()
        .map(|event| event.trim().to_lowercase())
        .filter(|event| !event.is_empty())
        .collect();

    for turn in turns {
        if turn.shows_recovery_signal() {
            recovery_candidate = true;
        }

        if turn.loop_exhausted {
            loop_safe = false;
            passed = false;
            push_reason(&mut reasons, "turn_loop_exhausted");
        }
        if turn.phase_pingpong {
            loop_safe = false;
            passed = false;
            push_reason(&mut reasons, "phase_pingpong_detected");
        }
        if turn.finalization_reason == FINALIZATION_TASK_TURN_LIMIT {
            loop_safe = false;
            passed = false;
            push_reason(&mut reasons, FINALIZATION_TASK_TURN_LIMIT);
        }

        if hard_fail_events.contains(EVENT_TURN_COMPLETION_CONTINUE)
            && turn.completion_retries > 0
        {
            passed = false;
            push_reason(&mut reasons, "turn_completion_continue");
        }
        if hard_fail_events.contains(EVENT_TASK_LOOP_CONTINUE) && turn.task_loop_continues > 0 {
            passed = false;
            push_reason(&mut reasons, "task_loop_continue");
        }
        if hard_fail_events.contains(EVENT_TURN_LOOP_EXHAUSTED) && turn.loop_exhausted {
            passed = false;
            push_reason(&mut reasons, "turn_loop_exhausted");
        }

        if !turn.monitor_abort.is_empty() {
            passed = false;
            loop_safe = false;
            push_reason(&mut reasons, format!("monitor_abort:{}", turn.monitor_abort));
        }
        if !turn.run_error.is_empty() {
            passed = false;
            push_reason(&mut reasons, "run_error");
        }
    }

    for group in &task.must_contain {
        if !or_group_matches(group, &text_lower) {
            passed = false;
            push_reason(&mut reasons, "missing_must_contain");
        }
    }
    for forbidden in &task.forbidden {
        let forbidden = forbidden.trim().to_lowercase();
        if !forbidden.is_empty() && text_lower.contains(&forbidden) {
            passed = false;
            push_reason(&mut reasons, "contains_forbidden");
        }
    }
    if task.require_evidence && !has_evidence(workspace, &text_lower) {
        passed = false;
        push_reason(&mut reasons, "missing_evidence_path");
    }

    // Without a recovery candidate there is no evidence of failed
    // recovery, so the flag stays vacuously true.
    let recovery_succeeded = if recovery_candidate {
        passed && !fallback_final
    } else {
        true
    };

    TaskOutcome {
        passed,
        loop_safe,
        fallback_final,
        recovery_candidate,
        recovery_succeeded,
        hard_fail_reasons: dedup_reasons(reasons),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Stage, TaskSpec};

    fn task() -> TaskSpec {
        TaskSpec {
            id: "t1".to_string(),
            stage: Stage::Screen,
            turns: vec!["inspect ${workspace}".to_string()],
            ..TaskSpec::default()
        }
    }

    fn clean_turn() -> TurnMetrics {
        TurnMetrics {
            attempts: 1,
            ..TurnMetrics::default()
        }
    }

    #[test]
    fn test_clean_pass() {
        let outcome = assess_task_outcome(&task(), "/ws", "All tests pass.", &[clean_turn()]);
        assert!(outcome.passed);
        assert!(outcome.loop_safe);
        assert!(!outcome.fallback_final);
        assert!(!outcome.recovery_candidate);
        assert!(outcome.recovery_succeeded);
        assert!(outcome.hard_fail_reasons.is_empty());
    }

    #[test]
    fn test_fallback_and_loop_exhaustion() {
        // A give-up closing plus a declared loop-exhaustion hard fail.
        let mut spec = task();
        spec.must_contain = vec!["结论|conclusion|result".to_string()];
        spec.require_evidence = true;
        spec.hard_fail_events = vec!["turn.loop.exhausted".to_string()];

        let turn = TurnMetrics {
            loop_exhausted: true,
            ..clean_turn()
        };
        let text = "I have reached the current automatic loop limit. Reply with one concrete next step.";
        let outcome = assess_task_outcome(&spec, "/ws", text, &[turn]);

        assert!(!outcome.passed);
        assert!(!outcome.loop_safe);
        assert!(outcome.fallback_final);
        assert!(outcome
            .hard_fail_reasons
            .contains(&"fallback_final_message".to_string()));
        assert!(outcome
            .hard_fail_reasons
            .contains(&"turn_loop_exhausted".to_string()));
        // Declared-event and loop-safety paths both emit the reason once.
        assert_eq!(
            outcome
                .hard_fail_reasons
                .iter()
                .filter(|r| r.as_str() == "turn_loop_exhausted")
                .count(),
            1
        );
    }

    #[test]
    fn test_or_group_semantics() {
        assert!(or_group_matches("结论|conclusion|result", "the result is 42"));
        assert!(or_group_matches("结论|conclusion|result", "最终结论如下"));
        assert!(!or_group_matches("alpha|beta", "gamma only"));
        // Empty requirement list always matches.
        let outcome = assess_task_outcome(&task(), "/ws", "anything", &[clean_turn()]);
        assert!(outcome.passed);
    }

    #[test]
    fn test_forbidden_and_evidence() {
        let mut spec = task();
        spec.forbidden = vec!["panic".to_string()];
        spec.require_evidence = true;

        let outcome = assess_task_outcome(&spec, "/work/repo", "it did Panic somewhere", &[]);
        assert!(!outcome.passed);
        assert!(outcome
            .hard_fail_reasons
            .contains(&"contains_forbidden".to_string()));
        assert!(outcome
            .hard_fail_reasons
            .contains(&"missing_evidence_path".to_string()));

        let outcome =
            assess_task_outcome(&spec, "/work/repo", "checked /work/repo and go.mod", &[]);
        assert!(!outcome
            .hard_fail_reasons
            .contains(&"missing_evidence_path".to_string()));
    }

    #[test]
    fn test_monitor_abort_and_run_error() {
        let turn = TurnMetrics {
            monitor_abort: "repeated_delta".to_string(),
            run_error: "boom".to_string(),
            ..clean_turn()
        };
        let outcome = assess_task_outcome(&task(), "/ws", "fine", &[turn]);
        assert!(!outcome.passed);
        assert!(!outcome.loop_safe);
        assert!(outcome
            .hard_fail_reasons
            .contains(&"monitor_abort:repeated_delta".to_string()));
        assert!(outcome.hard_fail_reasons.contains(&"run_error".to_string()));
    }

    #[test]
    fn test_recovery_candidate_tracks_pass() {
        let recovering = TurnMetrics {
            tool_errors: 1,
            ..clean_turn()
        };
        let outcome = assess_task_outcome(&task(), "/ws", "done", &[recovering.clone()]);
        assert!(outcome.recovery_candidate);
        assert!(outcome.recovery_succeeded);

        let mut spec = task();
        spec.must_contain = vec!["absent-token".to_string()];
        let outcome = assess_task_outcome(&spec, "/ws", "done", &[recovering]);
        assert!(outcome.recovery_candidate);
        assert!(!outcome.recovery_succeeded);
    }

    #[test]
    fn test_recovery_vacuously_true_without_candidate() {
        let mut spec = task();
        spec.must_contain = vec!["absent".to_string()];
        let outcome = assess_task_outcome(&spec, "/ws", "text", &[clean_turn()]);
        assert!(!outcome.passed);
        assert!(!outcome.recovery_candidate);
        assert!(outcome.recovery_succeeded);
    }

    #[test]
    fn test_declared_hard_fail_events() {
        let mut spec = task();
        spec.hard_fail_events = vec![
            "turn.completion.continue".to_string(),
            "task.loop.continue".to_string(),
        ];
        let turn = TurnMetrics {
            completion_retries: 2,
            task_loop_continues: 1,
            ..clean_turn()
        };
        let outcome = assess_task_outcome(&spec, "/ws", "done", &[turn.clone()]);
        assert!(!outcome.passed);
        // Loop safety is untouched by declared events alone.
        assert!(outcome.loop_safe);
        assert!(outcome
            .hard_fail_reasons
            .contains(&"turn_completion_continue".to_string()));
        assert!(outcome
            .hard_fail_reasons
            .contains(&"task_loop_continue".to_string()));

        // Without the declaration the same telemetry is tolerated.
        let outcome = assess_task_outcome(&task(), "/ws", "done", &[turn]);
        assert!(outcome.passed);
    }

    #[test]
    fn test_assessment_is_pure() {
        let mut spec = task();
        spec.must_contain = vec!["a|b".to_string()];
        let turns = vec![TurnMetrics {
            monitor_abort: "tool_signature_loop".to_string(),
            ..clean_turn()
        }];
        let first = assess_task_outcome(&spec, "/ws", "text with a", &turns);
        let second = assess_task_outcome(&spec, "/ws", "text with a", &turns);
        assert_eq!(first, second);
    }

    #[test]
    fn test_reason_dedup_is_case_insensitive_and_ordered() {
        let reasons = dedup_reasons(vec![
            "Fallback_Final_Message".to_string(),
            String::new(),
            "fallback_final_message".to_string(),
            "run_error".to_string(),
        ]);
        assert_eq!(reasons, vec!["Fallback_Final_Message", "run_error"]);
    }
}
