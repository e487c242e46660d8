//! Per-turn telemetry folded from the run event log.
//!
//! After a turn finishes, the executor's event log is folded into a single
//! [`TurnMetrics`] record. Outcome assessment and scoring consume these
//! records; they never look at raw events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runner::RunEvent;

pub const EVENT_TURN_ATTEMPT_STARTED: &str = "turn.attempt.started";
pub const EVENT_TOOL_CALL: &str = "tool.call";
pub const EVENT_TOOL_ERROR: &str = "tool.error";
pub const EVENT_TURN_RECOVERY_TRIGGERED: &str = "turn.recovery.triggered";
pub const EVENT_TURN_COMPLETION_CONTINUE: &str = "turn.completion.continue";
pub const EVENT_TASK_LOOP_CONTINUE: &str = "task.loop.continue";
pub const EVENT_TURN_LOOP_EXHAUSTED: &str = "turn.loop.exhausted";
pub const EVENT_RUN_END: &str = "run.end";

/// Finalization reason that means the task ran out of turns.
pub const FINALIZATION_TASK_TURN_LIMIT: &str = "task_turn_limit_reached";

/// Consecutive completion-continue / task-loop-continue alternations that
/// count as a phase ping-pong.
const PINGPONG_ALTERNATION_MIN: usize = 4;

/// Everything observed about one turn of one task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    pub attempts: u32,
    pub tool_calls: u32,
    pub tool_errors: u32,
    pub recoveries: u32,
    pub completion_retries: u32,
    pub task_loop_continues: u32,
    pub loop_exhausted: bool,
    pub phase_pingpong: bool,
    /// Reason reported by the run's `run.end` event, empty if none.
    pub finalization_reason: String,
    /// Abort reason from the stream monitor, empty if it never fired.
    pub monitor_abort: String,
    /// Executor-level failure for this turn, empty if none.
    pub run_error: String,
    /// Ordered tags of the continue/exhaust events as they happened.
    pub completion_reason_flow: Vec<String>,
}

impl TurnMetrics {
    /// A turn that never ran because the executor failed up front.
    pub fn from_run_error(error: impl Into<String>) -> Self {
        Self {
            run_error: error.into(),
            ..Self::default()
        }
    }

    /// True when the turn shows at least one self-correction signal.
    pub fn shows_recovery_signal(&self) -> bool {
        self.tool_errors > 0
            || self.recoveries > 0
            || self.completion_retries > 0
            || self.task_loop_continues > 0
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

fn flow_tag(event_type: &str, payload: &Value) -> String {
    let reason = payload_str(payload, "reason");
    if reason.is_empty() {
        event_type.to_string()
    } else {
        format!("{}:{}", event_type, reason)
    }
}

/// Fold a turn's event log into a [`TurnMetrics`] record.
///
/// Unknown event types are counted nowhere and dropped, mirroring the
/// stream monitor's tolerance for future event kinds.
pub fn fold_run_events(events: &[RunEvent]) -> TurnMetrics {
    let mut metrics = TurnMetrics::default();

    for event in events {
        match event.event_type.as_str() {
            EVENT_TURN_ATTEMPT_STARTED => metrics.attempts += 1,
            EVENT_TOOL_CALL => metrics.tool_calls += 1,
            EVENT_TOOL_ERROR => metrics.tool_errors += 1,
            EVENT_TURN_RECOVERY_TRIGGERED => metrics.recoveries += 1,
            EVENT_TURN_COMPLETION_CONTINUE => {
                metrics.completion_retries += 1;
                metrics
                    .completion_reason_flow
                    .push(flow_tag(EVENT_TURN_COMPLETION_CONTINUE, &event.payload));
            }
            EVENT_TASK_LOOP_CONTINUE => {
                metrics.task_loop_continues += 1;
                metrics
                    .completion_reason_flow
                    .push(flow_tag(EVENT_TASK_LOOP_CONTINUE, &event.payload));
            }
            EVENT_TURN_LOOP_EXHAUSTED => {
                metrics.loop_exhausted = true;
                metrics
                    .completion_reason_flow
                    .push(EVENT_TURN_LOOP_EXHAUSTED.to_string());
            }
            EVENT_RUN_END => {
                metrics.finalization_reason =
                    payload_str(&event.payload, "finalization_reason").to_string();
                if payload_str(&event.payload, "state") == "error" {
                    let detail = payload_str(&event.payload, "error");
                    metrics.run_error = if detail.is_empty() {
                        "run_ended_in_error_state".to_string()
                    } else {
                        detail.to_string()
                    };
                }
            }
            _ => {}
        }
    }

    metrics.phase_pingpong = detect_phase_pingpong(&metrics.completion_reason_flow);
    metrics
}

/// A phase ping-pong is the run bouncing between turn-completion retries
/// and task-loop continuations without converging: four or more
/// consecutive alternations between the two tag kinds.
fn detect_phase_pingpong(flow: &[String]) -> bool {
    let kinds: Vec<&str> = flow
        .iter()
        .map(|tag| tag.split(':').next().unwrap_or(tag))
        .filter(|kind| {
            *kind == EVENT_TURN_COMPLETION_CONTINUE || *kind == EVENT_TASK_LOOP_CONTINUE
        })
        .collect();

    let mut run = 1usize;
    for pair in kinds.windows(2) {
        if pair[0] != pair[1] {
            run += 1;
            if run >= PINGPONG_ALTERNATION_MIN {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str) -> RunEvent {
        RunEvent {
            event_type: event_type.to_string(),
            payload: Value::Null,
        }
    }

    fn event_with(event_type: &str, payload: Value) -> RunEvent {
        RunEvent {
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[test]
    fn test_fold_counts_and_flags() {
        let events = vec![
            event(EVENT_TURN_ATTEMPT_STARTED),
            event(EVENT_TOOL_CALL),
            event(EVENT_TOOL_CALL),
            event(EVENT_TOOL_ERROR),
            event(EVENT_TURN_RECOVERY_TRIGGERED),
            event(EVENT_TURN_ATTEMPT_STARTED),
            event_with(EVENT_TURN_COMPLETION_CONTINUE, json!({"reason":"no_output"})),
            event(EVENT_TURN_LOOP_EXHAUSTED),
            event_with(
                EVENT_RUN_END,
                json!({"finalization_reason":"loop_limit","state":"completed"}),
            ),
        ];

        let metrics = fold_run_events(&events);
        assert_eq!(metrics.attempts, 2);
        assert_eq!(metrics.tool_calls, 2);
        assert_eq!(metrics.tool_errors, 1);
        assert_eq!(metrics.recoveries, 1);
        assert_eq!(metrics.completion_retries, 1);
        assert!(metrics.loop_exhausted);
        assert!(!metrics.phase_pingpong);
        assert_eq!(metrics.finalization_reason, "loop_limit");
        assert!(metrics.run_error.is_empty());
        assert_eq!(
            metrics.completion_reason_flow,
            vec![
                "turn.completion.continue:no_output".to_string(),
                "turn.loop.exhausted".to_string(),
            ]
        );
        assert!(metrics.shows_recovery_signal());
    }

    #[test]
    fn test_run_end_error_state_sets_run_error() {
        let metrics = fold_run_events(&[event_with(
            EVENT_RUN_END,
            json!({"state":"error","error":"backend exploded"}),
        )]);
        assert_eq!(metrics.run_error, "backend exploded");

        let metrics = fold_run_events(&[event_with(EVENT_RUN_END, json!({"state":"error"}))]);
        assert_eq!(metrics.run_error, "run_ended_in_error_state");
    }

    #[test]
    fn test_phase_pingpong_alternation() {
        let events = vec![
            event(EVENT_TURN_COMPLETION_CONTINUE),
            event(EVENT_TASK_LOOP_CONTINUE),
            event(EVENT_TURN_COMPLETION_CONTINUE),
            event(EVENT_TASK_LOOP_CONTINUE),
        ];
        assert!(fold_run_events(&events).phase_pingpong);

        // Repeats of the same kind reset the alternation.
        let events = vec![
            event(EVENT_TURN_COMPLETION_CONTINUE),
            event(EVENT_TURN_COMPLETION_CONTINUE),
            event(EVENT_TASK_LOOP_CONTINUE),
            event(EVENT_TASK_LOOP_CONTINUE),
        ];
        assert!(!fold_run_events(&events).phase_pingpong);
    }

    #[test]
    fn test_unknown_events_are_dropped() {
        let metrics = fold_run_events(&[event("future.event.kind")]);
        assert_eq!(metrics, TurnMetrics::default());
    }
}
