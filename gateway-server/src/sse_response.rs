//! Renders a normalized [`AdapterEvent`] stream as either OpenAI SSE bytes
//! (a prefix of well-formed `data: ...` records terminated by
//! `data: [DONE]`) or, for `stream:false`, a single aggregated
//! `chat.completion` JSON object.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use gateway_core::openai::{ChatCompletionResponse, ResponseChoice, ResponseMessage, ResponseToolCall, ResponseToolCallFunction, ResponseUsage};
use gateway_core::AdapterError;
use stream_event::{to_sse_line, AdapterEvent, ChunkEnvelope, FinishReason, DONE_LINE};

pub type EventStream = BoxStream<'static, Result<AdapterEvent, AdapterError>>;

/// Streams `events` as `text/event-stream`, one SSE line per event, always
/// ending with `data: [DONE]\n\n` — even when the upstream stream ends in
/// error, so the client never sees a truncated response.
pub fn streaming_response(events: EventStream, envelope: ChunkEnvelope) -> Response {
    let body_stream = async_stream::stream! {
        futures::pin_mut!(events);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => yield Ok::<_, std::convert::Infallible>(bytes::Bytes::from(to_sse_line(&event, &envelope))),
                Err(err) => {
                    let event = AdapterEvent::Error(err.message.clone());
                    yield Ok(bytes::Bytes::from(to_sse_line(&event, &envelope)));
                    break;
                }
            }
        }
        yield Ok(bytes::Bytes::from(DONE_LINE));
    };

    Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Drains `events` into one aggregated `chat.completion` response, mirroring
/// the streaming emission exactly — the non-stream path produces the same
/// tool-call/content split the streaming path would have.
/// Returns `Err` only if the upstream stream itself errored before any
/// content was produced; a mid-flight error after some content still
/// resolves to `Ok` with the error text appended, matching the streaming
/// behavior.
pub async fn aggregate(mut events: EventStream, envelope: ChunkEnvelope) -> ChatCompletionResponse {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ResponseToolCall> = Vec::new();
    let mut finish = "stop";
    let mut usage: Option<ResponseUsage> = None;

    while let Some(item) = events.next().await {
        match item {
            Ok(AdapterEvent::Role(_)) => {}
            Ok(AdapterEvent::ContentDelta(text)) => content.push_str(&text),
            Ok(AdapterEvent::ReasoningDelta(text)) => reasoning.push_str(&text),
            Ok(AdapterEvent::ToolCallDelta { id, name, arguments, .. }) => {
                tool_calls.push(ResponseToolCall {
                    id,
                    kind: "function",
                    function: ResponseToolCallFunction { name, arguments },
                });
            }
            Ok(AdapterEvent::Usage { prompt_tokens, completion_tokens, total_tokens }) => {
                usage = Some(ResponseUsage { prompt_tokens, completion_tokens, total_tokens });
            }
            Ok(AdapterEvent::Finish(reason)) => {
                finish = match reason {
                    FinishReason::Stop => "stop",
                    FinishReason::ToolCalls => "tool_calls",
                };
            }
            Ok(AdapterEvent::Error(message)) => {
                content.push_str(&format!("\nError: {message}"));
                finish = "stop";
                break;
            }
            Err(err) => {
                content.push_str(&format!("\nError: {}", err.message));
                finish = "stop";
                break;
            }
        }
    }

    let message = ResponseMessage {
        role: "assistant",
        content: if tool_calls.is_empty() { Some(content) } else { None },
        reasoning_content: if reasoning.is_empty() { None } else { Some(reasoning) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
    };

    ChatCompletionResponse {
        id: envelope.id,
        object: "chat.completion",
        created: envelope.created,
        model: envelope.model,
        choices: vec![ResponseChoice { index: 0, message, finish_reason: finish }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn envelope() -> ChunkEnvelope {
        ChunkEnvelope::new("chatcmpl-test", 0, "deepseek-chat")
    }

    #[tokio::test]
    async fn aggregates_plain_content_with_stop_reason() {
        let events: EventStream = stream::iter(vec![
            Ok(AdapterEvent::Role("assistant".into())),
            Ok(AdapterEvent::ContentDelta("hi".into())),
            Ok(AdapterEvent::ContentDelta(" there".into())),
            Ok(AdapterEvent::Finish(FinishReason::Stop)),
        ])
        .boxed();
        let resp = aggregate(events, envelope()).await;
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hi there"));
        assert_eq!(resp.choices[0].finish_reason, "stop");
        assert!(resp.choices[0].message.tool_calls.is_none());
    }

    #[tokio::test]
    async fn aggregates_tool_calls_with_null_content() {
        let events: EventStream = stream::iter(vec![
            Ok(AdapterEvent::ToolCallDelta {
                index: 0,
                id: "call_1".into(),
                name: "search".into(),
                arguments: "{\"q\":\"go\"}".into(),
            }),
            Ok(AdapterEvent::Finish(FinishReason::ToolCalls)),
        ])
        .boxed();
        let resp = aggregate(events, envelope()).await;
        assert!(resp.choices[0].message.content.is_none());
        assert_eq!(resp.choices[0].message.tool_calls.as_ref().unwrap()[0].function.arguments, "{\"q\":\"go\"}");
        assert_eq!(resp.choices[0].finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn mid_flight_error_resolves_with_appended_message() {
        let events: EventStream = stream::iter(vec![
            Ok(AdapterEvent::ContentDelta("partial".into())),
            Err(AdapterError::transport("connection reset")),
        ])
        .boxed();
        let resp = aggregate(events, envelope()).await;
        let content = resp.choices[0].message.content.as_deref().unwrap();
        assert!(content.starts_with("partial"));
        assert!(content.contains("Error: connection reset"));
        assert_eq!(resp.choices[0].finish_reason, "stop");
    }
}
