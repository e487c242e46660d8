//! Real-time loop detection on a live run stream.
//!
//! A [`StreamMonitor`] taps the newline-delimited JSON response stream of
//! one run and proactively cancels pathological executions: a delta
//! repeating verbatim, a tool call re-issued with identical arguments, or
//! a tool call stuck waiting on an approval nobody will grant. Abort is
//! cooperative: the monitor cancels the run's token and the executor
//! stops at its next suspension point.
//!
//! The monitor is best-effort observability: malformed or unknown lines
//! are dropped silently and must never break a valid run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::{BlockPayload, StreamEvent, BLOCK_KIND_TOOL_CALL};
use crate::runner::{RunExecutor, RunMeta, StreamSink};

/// Identical normalized deltas required before aborting.
const DELTA_REPEAT_LIMIT: u32 = 10;
/// Identical tool signatures tolerated; one more aborts.
const TOOL_SIGNATURE_LIMIT: u32 = 16;
/// Normalized deltas are capped to this many code points before comparing.
const DELTA_NORMALIZED_CAP: usize = 500;
/// Poll cadence of the approval auto-reject task.
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Give up rejecting an approval after this long.
const APPROVAL_DEADLINE: Duration = Duration::from_secs(3);

pub const ABORT_REPEATED_DELTA: &str = "repeated_delta";
pub const ABORT_TOOL_SIGNATURE_LOOP: &str = "tool_signature_loop";

#[derive(Default)]
struct MonitorState {
    line_buf: String,
    last_delta: String,
    delta_repeats: u32,
    tool_signatures: HashMap<String, u32>,
    approvals_seen: HashSet<String>,
    abort_reason: String,
}

/// Watches one run's stream; owned by that run and discarded at run end.
pub struct StreamMonitor {
    state: Mutex<MonitorState>,
    cancel: CancellationToken,
    executor: Arc<dyn RunExecutor>,
    meta: RunMeta,
    run_id: String,
}

impl StreamMonitor {
    pub fn new(executor: Arc<dyn RunExecutor>, meta: RunMeta, run_id: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            cancel: CancellationToken::new(),
            executor,
            meta,
            run_id: run_id.into(),
        }
    }

    /// Token the run's execution must observe at its suspension points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current abort reason, empty string if the monitor never fired.
    pub fn abort_state(&self) -> String {
        self.state.lock().abort_reason.clone()
    }

    /// Consume a chunk of the raw response stream.
    ///
    /// Runs synchronously on whatever task drives the transport; complete
    /// lines are processed immediately, the trailing partial line is kept
    /// for the next chunk.
    pub fn feed(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let lines = {
            let mut state = self.state.lock();
            state.line_buf.push_str(&text);
            let mut lines = Vec::new();
            while let Some(pos) = state.line_buf.find('\n') {
                let line = state.line_buf[..pos].trim_end_matches('\r').to_string();
                state.line_buf.drain(..=pos);
                lines.push(line);
            }
            lines
        };
        for line in lines {
            self.process_line(&line);
        }
    }

    /// Record an abort reason and cancel the run. Idempotent: the first
    /// reason wins and later calls are no-ops. The token is cancelled
    /// outside the state lock.
    pub fn abort(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if !state.abort_reason.is_empty() {
                return;
            }
            state.abort_reason = reason.to_string();
        }
        warn!(run_id = %self.run_id, reason, "stream monitor aborting run");
        self.cancel.cancel();
    }

    fn process_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(_) => return,
        };
        match event {
            StreamEvent::BlockDelta { delta } => self.on_delta(&delta),
            StreamEvent::BlockSet { block } => self.on_block(block),
            StreamEvent::Unknown => {}
        }
    }

    fn on_delta(&self, delta: &str) {
        let normalized = normalize_delta(delta);
        if normalized.is_empty() {
            return;
        }
        let fire = {
            let mut state = self.state.lock();
            if normalized == state.last_delta {
                state.delta_repeats += 1;
            } else {
                state.last_delta = normalized;
                state.delta_repeats = 1;
            }
            state.delta_repeats >= DELTA_REPEAT_LIMIT
        };
        if fire {
            self.abort(ABORT_REPEATED_DELTA);
        }
    }

    fn on_block(&self, block: Value) {
        let payload: BlockPayload = match serde_json::from_value(block) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        if payload.kind != BLOCK_KIND_TOOL_CALL {
            return;
        }

        let signature = format!(
            "{}|{}",
            payload.tool_name.to_lowercase(),
            canonical_json(&payload.args)
        );
        let fire = {
            let mut state = self.state.lock();
            let count = state.tool_signatures.entry(signature).or_insert(0);
            *count += 1;
            *count > TOOL_SIGNATURE_LIMIT
        };
        if fire {
            self.abort(ABORT_TOOL_SIGNATURE_LOOP);
        }

        if payload.approval_pending() && !payload.tool_id.is_empty() {
            let first_sighting = {
                let mut state = self.state.lock();
                state.approvals_seen.insert(payload.tool_id.clone())
            };
            if first_sighting {
                self.spawn_auto_reject(payload.tool_id);
            }
        }
    }

    /// Reject a pending tool approval exactly once, retrying every 25ms
    /// for up to 3s (the backend may not have registered the approval
    /// yet), and stopping early if the run gets cancelled for another
    /// reason.
    fn spawn_auto_reject(&self, tool_id: String) {
        let executor = Arc::clone(&self.executor);
        let meta = self.meta.clone();
        let run_id = self.run_id.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + APPROVAL_DEADLINE;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match executor.approve_tool(&meta, &run_id, &tool_id, false).await {
                    Ok(()) => {
                        debug!(run_id = %run_id, tool_id = %tool_id, "auto-rejected pending tool approval");
                        return;
                    }
                    Err(err) => {
                        if tokio::time::Instant::now() >= deadline {
                            warn!(run_id = %run_id, tool_id = %tool_id, %err, "gave up rejecting tool approval");
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(APPROVAL_POLL_INTERVAL) => {}
                }
            }
        });
    }
}

impl StreamSink for Arc<StreamMonitor> {
    fn write_chunk(&mut self, bytes: &[u8]) {
        self.feed(bytes);
    }
}

/// Trim, lowercase, collapse whitespace, cap to 500 code points.
fn normalize_delta(delta: &str) -> String {
    let collapsed = delta
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() > DELTA_NORMALIZED_CAP {
        collapsed.chars().take(DELTA_NORMALIZED_CAP).collect()
    } else {
        collapsed
    }
}

/// Deterministic JSON rendering with recursively sorted object keys, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same tool signature.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
