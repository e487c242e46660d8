//! The run-execution collaborator seam.
//!
//! Everything that actually talks to the agent backend lives behind
//! [`RunExecutor`]: thread creation, run startup with a streamed response,
//! event-log retrieval, transcript retrieval, and tool approval. The
//! pipeline and monitor consume this trait only; deadlines and transport
//! concerns are the implementor's problem.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Identifies one run within one (variant, task) execution.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub thread_id: String,
    pub variant_id: String,
    pub task_id: String,
    pub workspace: String,
}

/// Loop-control settings handed to the backend for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopSettings {
    pub max_turn_attempts: u32,
    pub completion_retry_limit: u32,
    pub task_loop_continue_limit: u32,
}

/// One turn's request to the backend.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Rendered turn prompt (workspace token already substituted).
    pub prompt: String,
    /// System prompt of the variant's prompt profile.
    pub system_prompt: String,
    pub loop_settings: LoopSettings,
    pub max_steps: u32,
    /// Per-turn deadline, enforced by the executor.
    pub timeout: Duration,
}

/// One entry of a run's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// One message of a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    pub content: String,
}

/// Receives the raw response byte stream of a run.
///
/// `start_run` writes every streamed chunk here; the pipeline installs a
/// sink that taps the stream into the turn's monitor.
pub trait StreamSink: Send {
    fn write_chunk(&mut self, bytes: &[u8]);
}

/// The external agent-execution backend.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Allocate a conversation thread; turns of one task share it.
    async fn create_thread(&self, meta: &RunMeta) -> Result<String>;

    /// Execute one run to completion, streaming the response into `sink`.
    ///
    /// Implementations must observe `cancel` at their own suspension
    /// points (between streamed chunks, before tool dispatch) and stop
    /// cooperatively; nothing force-kills a run.
    async fn start_run(
        &self,
        cancel: CancellationToken,
        meta: &RunMeta,
        run_id: &str,
        request: &RunRequest,
        sink: &mut dyn StreamSink,
    ) -> Result<()>;

    /// Fetch up to `limit` telemetry events recorded for a run.
    async fn list_run_events(
        &self,
        meta: &RunMeta,
        run_id: &str,
        limit: usize,
    ) -> Result<Vec<RunEvent>>;

    /// Fetch the role-tagged transcript of a thread.
    async fn list_thread_messages(
        &self,
        meta: &RunMeta,
        thread_id: &str,
    ) -> Result<Vec<ThreadMessage>>;

    /// Approve or reject a pending tool call.
    async fn approve_tool(
        &self,
        meta: &RunMeta,
        run_id: &str,
        tool_id: &str,
        approved: bool,
    ) -> Result<()>;
}
