//! OpenAI-compatible chat completion request/response DTOs and the
//! message-shaping helpers every adapter uses to turn them into a vendor
//! payload.
//!
//! Mirrors the shape of `openai_sse::request`, extended with the gateway's
//! own extensions (`web_search`, `reasoning_effort`, `deep_research`,
//! `tools`, `tool_choice`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub logit_bias: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    /// Gateway extension: explicit web search mode.
    #[serde(default)]
    pub web_search: Option<bool>,
    /// Gateway extension: explicit reasoning/thinking mode request.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Gateway extension (GLM `deep_research` chat mode).
    #[serde(default)]
    pub deep_research: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// One message in the request. `content` accepts either a plain string or an
/// array of multimodal parts (text/image_url/file), matching OpenAI's
/// untagged content shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<RequestToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestToolCall {
    pub id: String,
    pub function: RequestToolCallFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenates every text-bearing part; non-text parts (images, files)
    /// contribute nothing here (adapters that need them inspect `parts()`
    /// directly, e.g. GLM's file/image upload).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn parts(&self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(s) => vec![ContentPart {
                part_type: Some("text".to_string()),
                text: Some(s.clone()),
                image_url: None,
                file: None,
            }],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
    #[serde(default)]
    pub file: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A role-flattened view of the conversation: consecutive same-role turns
/// merged, with the system turn (if any) pulled out separately. Several
/// adapters (DeepSeek, Kimi, GLM, Z.ai) need exactly this shape, so it's
/// computed once by the forwarder and handed to every adapter.
#[derive(Debug, Clone)]
pub struct FlatTurn {
    pub role: String,
    pub text: String,
    pub has_files: bool,
}

/// Pulls the (concatenated) system prompt out of `messages`, returning the
/// remaining non-system turns unchanged.
pub fn split_system_prompt(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for m in messages {
        if m.role == "system" {
            if let Some(c) = &m.content {
                system_parts.push(c.as_text());
            }
        } else {
            rest.push(m);
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, rest)
}

/// Merges consecutive same-role turns into one, rendering tool-call history
/// (assistant `tool_calls` + `role: "tool"` replies) into the bracketed
/// `[function_calls]...[/function_calls]` / `[TOOL_RESULT for <id>]` textual
/// form used by GLM and available to any adapter that flattens to a
/// single prompt string.
pub fn flatten_turns(messages: &[&ChatMessage]) -> Vec<FlatTurn> {
    let mut out: Vec<FlatTurn> = Vec::new();
    for m in messages {
        let text = render_message_text(m);
        let has_files = m
            .content
            .as_ref()
            .map(|c| c.parts().iter().any(|p| p.image_url.is_some() || p.file.is_some()))
            .unwrap_or(false);
        if let Some(last) = out.last_mut() {
            if last.role == m.role {
                last.text.push('\n');
                last.text.push_str(&text);
                last.has_files = last.has_files || has_files;
                continue;
            }
        }
        out.push(FlatTurn {
            role: m.role.clone(),
            text,
            has_files,
        });
    }
    out
}

fn render_message_text(m: &ChatMessage) -> String {
    if m.role == "tool" {
        let id = m.tool_call_id.as_deref().unwrap_or("unknown");
        let body = m.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
        return format!("[TOOL_RESULT for {id}] {body}");
    }
    if let Some(calls) = &m.tool_calls {
        if !calls.is_empty() {
            let mut block = String::from("[function_calls]");
            for c in calls {
                block.push_str(&format!(
                    "[call:{}]{}[/call]",
                    c.function.name, c.function.arguments
                ));
            }
            block.push_str("[/function_calls]");
            let prefix = m.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
            return if prefix.is_empty() {
                block
            } else {
                format!("{prefix}\n{block}")
            };
        }
    }
    m.content.as_ref().map(|c| c.as_text()).unwrap_or_default()
}

/// Renders `turns` as a single prompt, one line per turn prefixed by its
/// role label, trailing with `Assistant: ` to invite the completion — GLM's
/// flattening scheme.
pub fn render_labeled_prompt(system: Option<&str>, turns: &[FlatTurn]) -> String {
    let mut out = String::new();
    if let Some(s) = system {
        out.push_str("System: ");
        out.push_str(s);
        out.push('\n');
    }
    for t in turns {
        let label = match t.role.as_str() {
            "assistant" => "Assistant",
            "tool" => "Assistant",
            _ => "User",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&t.text);
        out.push('\n');
    }
    out.push_str("Assistant: ");
    out
}

/// `chat.completion` non-streaming response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ResponseChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ResponseToolCallFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    #[test]
    fn split_system_prompt_pulls_system_out() {
        let messages = vec![msg("system", "be nice"), msg("user", "hi")];
        let (system, rest) = split_system_prompt(&messages);
        assert_eq!(system.as_deref(), Some("be nice"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn flatten_turns_merges_consecutive_same_role() {
        let messages = vec![msg("user", "a"), msg("user", "b"), msg("assistant", "c")];
        let refs: Vec<&ChatMessage> = messages.iter().collect();
        let flat = flatten_turns(&refs);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].text, "a\nb");
        assert_eq!(flat[1].role, "assistant");
    }

    #[test]
    fn labeled_prompt_ends_with_assistant_prefix() {
        let messages = vec![msg("user", "hi")];
        let refs: Vec<&ChatMessage> = messages.iter().collect();
        let flat = flatten_turns(&refs);
        let prompt = render_labeled_prompt(Some("sys"), &flat);
        assert!(prompt.ends_with("Assistant: "));
        assert!(prompt.contains("System: sys"));
    }
}
