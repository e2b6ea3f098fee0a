//! OpenAI SSE envelope: wraps an [`AdapterEvent`] into a
//! `chat.completion.chunk` JSON object and renders it as a `data: ...\n\n`
//! line.

use crate::event::{AdapterEvent, FinishReason};
use serde_json::{json, Value};

pub const DONE_LINE: &str = "data: [DONE]\n\n";

/// Per-stream constants threaded into every chunk: id/object/created/model
/// are fixed for the life of one response.
#[derive(Clone, Debug)]
pub struct ChunkEnvelope {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkEnvelope {
    pub fn new(id: impl Into<String>, created: i64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }
}

fn base_chunk(env: &ChunkEnvelope) -> Value {
    json!({
        "id": env.id,
        "object": "chat.completion.chunk",
        "created": env.created,
        "model": env.model,
    })
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool_calls",
    }
}

/// Renders one [`AdapterEvent`] as an OpenAI `chat.completion.chunk` JSON value.
pub fn to_json(event: &AdapterEvent, env: &ChunkEnvelope) -> Value {
    let mut chunk = base_chunk(env);
    let obj = chunk.as_object_mut().expect("object");
    match event {
        AdapterEvent::Role(role) => {
            obj.insert(
                "choices".into(),
                json!([{"index": 0, "delta": {"role": role}, "finish_reason": Value::Null}]),
            );
        }
        AdapterEvent::ContentDelta(text) => {
            obj.insert(
                "choices".into(),
                json!([{"index": 0, "delta": {"content": text}, "finish_reason": Value::Null}]),
            );
        }
        AdapterEvent::ReasoningDelta(text) => {
            obj.insert(
                "choices".into(),
                json!([{"index": 0, "delta": {"reasoning_content": text}, "finish_reason": Value::Null}]),
            );
        }
        AdapterEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments,
        } => {
            obj.insert(
                "choices".into(),
                json!([{
                    "index": 0,
                    "delta": {
                        "tool_calls": [{
                            "index": index,
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": arguments},
                        }]
                    },
                    "finish_reason": Value::Null,
                }]),
            );
        }
        AdapterEvent::Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        } => {
            obj.insert(
                "choices".into(),
                json!([{"index": 0, "delta": {}, "finish_reason": Value::Null}]),
            );
            obj.insert(
                "usage".into(),
                json!({
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": total_tokens,
                }),
            );
        }
        AdapterEvent::Finish(reason) => {
            obj.insert(
                "choices".into(),
                json!([{"index": 0, "delta": {}, "finish_reason": finish_reason_str(*reason)}]),
            );
        }
        AdapterEvent::Error(message) => {
            obj.insert(
                "choices".into(),
                json!([{
                    "index": 0,
                    "delta": {"content": format!("\nError: {message}")},
                    "finish_reason": "stop",
                }]),
            );
        }
    }
    chunk
}

/// Renders one event as a complete SSE `data: ...\n\n` line.
pub fn to_sse_line(event: &AdapterEvent, env: &ChunkEnvelope) -> String {
    format!("data: {}\n\n", to_json(event, env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta_round_trips_through_json() {
        let env = ChunkEnvelope::new("chatcmpl-1", 1700000000, "deepseek-chat");
        let v = to_json(&AdapterEvent::ContentDelta("hi".into()), &env);
        assert_eq!(v["choices"][0]["delta"]["content"], "hi");
        assert_eq!(v["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn finish_chunk_carries_reason_and_empty_delta() {
        let env = ChunkEnvelope::new("chatcmpl-1", 0, "glm-4");
        let v = to_json(&AdapterEvent::Finish(FinishReason::ToolCalls), &env);
        assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(v["choices"][0]["delta"], json!({}));
    }

    #[test]
    fn tool_call_arguments_are_not_reserialized() {
        let env = ChunkEnvelope::new("chatcmpl-1", 0, "z-glm");
        let raw_args = r#"{"q":  "go"}"#;
        let v = to_json(
            &AdapterEvent::ToolCallDelta {
                index: 0,
                id: "call_1".into(),
                name: "search".into(),
                arguments: raw_args.into(),
            },
            &env,
        );
        assert_eq!(
            v["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            raw_args
        );
    }

    #[test]
    fn sse_line_ends_with_double_newline() {
        let env = ChunkEnvelope::new("chatcmpl-1", 0, "kimi");
        let line = to_sse_line(&AdapterEvent::ContentDelta("x".into()), &env);
        assert!(line.starts_with("data: "));
        assert!(line.ends_with("\n\n"));
    }
}
