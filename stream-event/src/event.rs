//! Adapter-level event types: the vendor-agnostic shape a `StreamHandler`
//! produces as it pumps an upstream response. Everything is a plain string
//! (never pre-serialized JSON) so the stream tool-call interceptor can scan
//! content byte-for-byte and forward tool-call arguments without
//! re-serializing them.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

/// One adapter-level event, emitted in arrival order by a vendor's
/// `StreamHandler` and, after interception, by the tool-call decorator
/// around it. The
/// first `Role` event on a stream ordinarily precedes any delta.
#[derive(Clone, Debug)]
pub enum AdapterEvent {
    /// A role-only delta, sent once at the start of a response.
    Role(String),
    /// A plain content delta (post-interception, free of tool-call markers).
    ContentDelta(String),
    /// A reasoning/thinking delta (DeepSeek `reasoning_content`, GLM `think`,
    /// Qwen-AI `phase="think"`/`"thinking_summary"`).
    ReasoningDelta(String),
    /// One parsed tool invocation, in OpenAI `tool_calls` delta shape.
    /// `arguments` is the byte-exact substring between `[call:NAME]` and
    /// `[/call]` (or the XML form's `<arguments>`), never re-serialized.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    /// Terminal: no further events follow on this stream.
    Finish(FinishReason),
    /// Mid-flight vendor error: rendered as one terminal content suffix plus
    /// `finish_reason = "stop"`, never as a broken stream.
    Error(String),
}
