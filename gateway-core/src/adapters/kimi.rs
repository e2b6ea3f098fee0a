//! Kimi adapter: Connect-RPC over HTTPS, one framed request, a
//! sequence of length-prefixed JSON frames in response.

use super::support::{byte_stream, classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::error::AdapterError;
use crate::interceptor::ToolCallInterceptor;
use crate::openai::{flatten_turns, split_system_prompt, FlatTurn};
use crate::signing::looks_like_kimi_jwt;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use gateway_types::Account;
use serde_json::{json, Value};
use stream_event::AdapterEvent;

const BASE: &str = "https://kimi.moonshot.cn/api";

#[derive(Default)]
pub struct KimiAdapter;

impl KimiAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// Wraps a URL with a synthetic `<url ...>...</url>` tag: the web
/// client does this so the vendor's own link-preview pass can find URLs
/// without re-running link detection upstream.
fn wrap_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(start) = rest.find("http://").or_else(|| rest.find("https://")) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let url_part = &rest[start..];
        let end = url_part
            .find(|c: char| c.is_whitespace())
            .unwrap_or(url_part.len());
        let (url, remainder) = url_part.split_at(end);
        out.push_str(&format!("<url src=\"{url}\">{url}</url>"));
        rest = remainder;
    }
    out
}

fn render_kimi_blocks(system: Option<&str>, turns: &[FlatTurn]) -> (Option<String>, String) {
    let mut last_has_files = false;
    let mut body = String::new();
    for (i, t) in turns.iter().enumerate() {
        let is_last = i == turns.len() - 1;
        if is_last && t.role != "assistant" {
            last_has_files = t.has_files;
        }
        if t.role == "assistant" {
            body.push_str(&t.text);
        } else {
            body.push_str(&wrap_urls(&t.text));
        }
        body.push('\n');
    }
    let note = if last_has_files {
        "Focus on the latest message and the attached files when answering."
    } else {
        "Focus on the latest message when answering."
    };
    body.push_str("\nsystem: ");
    body.push_str(note);
    (system.map(|s| format!("system: {s}")), body)
}

/// Encodes one Connect-RPC frame: 1-byte flag + 4-byte big-endian length + body.
fn encode_frame(flag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(flag);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[async_trait]
impl Adapter for KimiAdapter {
    fn provider_id(&self) -> &'static str {
        "kimi"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let token = ctx
            .account
            .credentials
            .jwt()
            .ok_or_else(|| AdapterError::protocol_drift("kimi account missing token"))?
            .to_string();
        let _is_jwt = looks_like_kimi_jwt(&token);

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let turns = flatten_turns(&rest);
        let (system_line, body_text) = render_kimi_blocks(system.as_deref(), &turns);
        let mut full_text = String::new();
        if let Some(s) = system_line {
            full_text.push_str(&s);
            full_text.push('\n');
        }
        full_text.push_str(&body_text);

        let wants_search = ctx.request.web_search.unwrap_or(false);
        let mut tools = Vec::new();
        if wants_search {
            tools.push(json!({"type": "TOOL_TYPE_SEARCH"}));
        }

        let payload = json!({
            "scenario": "SCENARIO_K2D5",
            "tools": tools,
            "message": {
                "role": "user",
                "blocks": [{"text": {"content": full_text}}],
                "scenario": "SCENARIO_K2D5",
            },
            "options": {"thinking": ctx.request.reasoning_effort.is_some()},
        });
        let body_json = serde_json::to_vec(&payload)
            .map_err(|e| AdapterError::protocol_drift(format!("kimi payload encode: {e}")))?;
        let frame = encode_frame(0x00, &body_json);

        let resp = HTTP
            .post(format!("{BASE}/chat/completion"))
            .headers(common_headers())
            .header("Content-Type", "application/connect+json")
            .bearer_auth(&token)
            .body(frame)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("kimi token rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let raw = byte_stream(resp);
        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = ToolCallInterceptor::new();
            let mut buf: Vec<u8> = Vec::new();
            futures::pin_mut!(raw);
            'outer: while let Some(chunk) = raw.next().await {
                let chunk: Bytes = match chunk { Ok(c) => c, Err(e) => { yield Err(e); return; } };
                buf.extend_from_slice(&chunk);
                loop {
                    if buf.len() < 5 { break; }
                    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
                    if buf.len() < 5 + len { break; }
                    let frame_body = buf[5..5 + len].to_vec();
                    buf.drain(..5 + len);
                    let Ok(frame): Result<Value, _> = serde_json::from_slice(&frame_body) else { continue };
                    if frame.get("done").is_some() {
                        break 'outer;
                    }
                    let op = frame.get("op").and_then(|v| v.as_str()).unwrap_or("");
                    if op == "set" || op == "append" {
                        if let Some(content) = frame.get("block").and_then(|b| b.get("text")).and_then(|t| t.get("content")).and_then(|v| v.as_str()) {
                            for ev in interceptor.push(content) {
                                yield Ok(ev);
                            }
                        }
                    }
                }
            }
            for ev in interceptor.finish() { yield Ok(ev); }
        });

        Ok(ChatOutcome {
            events,
            session: SessionHandle::new(),
        })
    }

    async fn delete(&self, _account: &Account, _session: &SessionHandle) -> bool {
        true
    }
}
