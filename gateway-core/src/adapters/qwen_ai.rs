//! Qwen-AI international adapter (`chat.qwen.ai`): JWT + optional paired
//! cookies, a constant WAF header triplet, a pre-chat call to mint a chat
//! id, then a phase-tagged SSE response that separates thinking from the
//! final answer.

use super::support::{byte_stream, classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::error::AdapterError;
use crate::fingerprint::waf_headers;
use crate::interceptor::xml::XmlToolCallInterceptor;
use crate::openai::split_system_prompt;
use crate::sse;
use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_types::Account;
use serde::Deserialize;
use serde_json::{json, Value};
use stream_event::AdapterEvent;
use uuid::Uuid;

const BASE: &str = "https://chat.qwen.ai";

/// Cookies the web client pairs with the bearer JWT when present; sent
/// verbatim, none are required on their own.
const PAIRED_COOKIES: &[&str] = &["cnaui", "aui", "sca", "cna", "xlly_s", "token", "_bl_uid", "x-ap"];

#[derive(Default)]
pub struct QwenAiAdapter;

impl QwenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn headers_with_waf(jwt: &str) -> reqwest::header::HeaderMap {
        let mut headers = common_headers();
        for (name, value) in waf_headers() {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Ok(auth) = reqwest::header::HeaderValue::from_str(&format!("Bearer {jwt}")) {
            headers.insert(reqwest::header::AUTHORIZATION, auth);
        }
        headers
    }

    fn cookie_header(account: &Account) -> Option<String> {
        let pairs: Vec<String> = PAIRED_COOKIES
            .iter()
            .filter_map(|name| account.credentials.cookie(name).map(|v| format!("{name}={v}")))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    async fn new_chat(&self, jwt: &str, cookie: Option<&str>) -> Result<String, AdapterError> {
        let mut req = HTTP
            .post(format!("{BASE}/api/v2/chats/new"))
            .headers(Self::headers_with_waf(jwt))
            .json(&json!({"title": "New Chat", "models": []}));
        if let Some(c) = cookie {
            req = req.header("Cookie", c);
        }
        let resp = req.send().await.map_err(transport_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_err)?;
        if status.as_u16() != 201 && !status.is_success() {
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("qwen-ai jwt rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }
        #[derive(Deserialize)]
        struct NewChatResp {
            chat: ChatInfo,
        }
        #[derive(Deserialize)]
        struct ChatInfo {
            id: String,
        }
        let parsed: NewChatResp = serde_json::from_str(&body)
            .map_err(|e| AdapterError::protocol_drift(format!("chats/new decode: {e}")))?;
        Ok(parsed.chat.id)
    }
}

#[async_trait]
impl Adapter for QwenAiAdapter {
    fn provider_id(&self) -> &'static str {
        "qwen-ai"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let jwt = ctx
            .account
            .credentials
            .jwt()
            .ok_or_else(|| AdapterError::protocol_drift("qwen-ai account missing jwt"))?
            .to_string();
        let cookie = Self::cookie_header(&ctx.account);

        let chat_id = self.new_chat(&jwt, cookie.as_deref()).await?;

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let user_text = rest
            .iter()
            .map(|m| m.content.as_ref().map(|c| c.as_text()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        let content = match system {
            Some(s) => format!("{s}\n\n{user_text}"),
            None => user_text,
        };

        let fid = Uuid::new_v4().to_string();
        let wants_thinking = ctx.request.reasoning_effort.is_some();
        let payload = json!({
            "chat_id": chat_id,
            "stream": true,
            "incremental_output": true,
            "model": ctx.actual_model,
            "messages": [{
                "fid": fid,
                "childrenIds": [],
                "role": "user",
                "content": content,
                "feature_config": {
                    "thinking_enabled": wants_thinking,
                    "output_schema": "phase",
                    "auto_thinking": wants_thinking,
                    "thinking_format": "summary",
                    "auto_search": ctx.request.web_search.unwrap_or(false),
                },
            }],
        });

        let mut req = HTTP
            .post(format!("{BASE}/api/v2/chat/completions"))
            .headers(Self::headers_with_waf(&jwt))
            .json(&payload);
        if let Some(c) = &cookie {
            req = req.header("Cookie", c.clone());
        }
        let resp = req.send().await.map_err(transport_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("qwen-ai jwt rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let line_stream = sse::lines(byte_stream(resp));
        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = XmlToolCallInterceptor::new();
            let mut reasoning_text = String::new();
            let mut summary_text = String::new();
            let mut reasoning_flushed = false;
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = match line { Ok(l) => l, Err(e) => { yield Err(e); return; } };
                let Some(payload) = sse::data_payload(&line) else { continue };
                if payload.is_empty() || payload == "[DONE]" { continue }
                let Ok(frame) = serde_json::from_str::<Value>(payload) else { continue };
                let Some(delta) = frame.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("delta")) else { continue };
                let phase = delta.get("phase").and_then(|v| v.as_str()).unwrap_or("");
                let status = delta.get("status").and_then(|v| v.as_str()).unwrap_or("");

                match phase {
                    "think" => {
                        if let Some(t) = delta.get("content").and_then(|v| v.as_str()) {
                            reasoning_text.push_str(t);
                        }
                    }
                    "thinking_summary" => {
                        if let Some(t) = delta.get("extra").and_then(|e| e.get("summary_thought")).and_then(|s| s.get("content")).and_then(|v| v.as_str()) {
                            summary_text = t.to_string();
                        }
                    }
                    "answer" => {
                        if !reasoning_flushed {
                            reasoning_flushed = true;
                            let combined = if !summary_text.is_empty() { &summary_text } else { &reasoning_text };
                            if !combined.is_empty() {
                                yield Ok(AdapterEvent::ReasoningDelta(combined.clone()));
                            }
                        }
                        if let Some(t) = delta.get("content").and_then(|v| v.as_str()) {
                            for ev in interceptor.push(t) { yield Ok(ev); }
                        }
                    }
                    _ => {}
                }

                if status == "finished" && (phase == "answer" || phase.is_empty()) {
                    break;
                }
            }
            for ev in interceptor.finish() { yield Ok(ev); }
        });

        Ok(ChatOutcome {
            events,
            session: SessionHandle::new().with("chat_id", chat_id),
        })
    }

    async fn delete(&self, _account: &Account, _session: &SessionHandle) -> bool {
        true
    }
}
