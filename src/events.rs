//! Wire shapes for the live run stream.
//!
//! The streaming transport emits newline-delimited JSON envelopes with a
//! `type` discriminator. Only `block-delta` and `block-set` carry signal
//! for loop detection; every other (or future) type deserializes into the
//! explicit `Unknown` variant and is ignored, so unknown event types never
//! break a valid run.

use serde::Deserialize;
use serde_json::Value;

/// One envelope on the live stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Incremental text for the block currently being streamed.
    #[serde(rename = "block-delta")]
    BlockDelta {
        #[serde(default, alias = "text")]
        delta: String,
    },

    /// A complete block replacing whatever was streamed so far.
    #[serde(rename = "block-set")]
    BlockSet {
        #[serde(default)]
        block: Value,
    },

    /// Anything else on the stream. Kept as an explicit variant so the
    /// dispatch is exhaustive over known types.
    #[serde(other)]
    Unknown,
}

/// The interesting subset of a `block-set` payload.
///
/// Blocks are loosely typed; fields that are absent deserialize to their
/// defaults and the block is simply not a tool call.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BlockPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "toolId", alias = "id")]
    pub tool_id: String,
    pub args: Value,
    pub approval: ApprovalState,
}

/// Approval metadata attached to a tool-call block.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApprovalState {
    pub required: bool,
    pub state: String,
}

/// Block type value that marks a tool invocation.
pub const BLOCK_KIND_TOOL_CALL: &str = "tool-call";

/// Approval state that means the run is blocked waiting on a human.
pub const APPROVAL_STATE_REQUIRED: &str = "required";

impl BlockPayload {
    /// True when this block is a tool call blocked on a pending approval.
    pub fn approval_pending(&self) -> bool {
        self.kind == BLOCK_KIND_TOOL_CALL
            && self.approval.required
            && self.approval.state == APPROVAL_STATE_REQUIRED
    }
}
