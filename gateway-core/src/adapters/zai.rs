//! Z.ai adapter: JWT auth, a two-layer HMAC-SHA-256 signed request with a
//! ~40-field forged fingerprint, a pre-chat call to mint a chat id, and an
//! SSE response whose `phase="done"` frame terminates the stream.

use super::support::{byte_stream, classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::error::AdapterError;
use crate::interceptor::DualToolCallInterceptor;
use crate::openai::split_system_prompt;
use crate::signing::{jwt_claim, zai_sign};
use crate::sse;
use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_types::{now_ms, Account};
use serde::Deserialize;
use serde_json::{json, Value};
use stream_event::AdapterEvent;
use uuid::Uuid;

const BASE: &str = "https://chat.z.ai";

#[derive(Default)]
pub struct ZaiAdapter;

impl ZaiAdapter {
    pub fn new() -> Self {
        Self
    }

    /// The same forty-odd browser/device fields every request carries,
    /// appended to the query string alongside the per-request signing
    /// fields (`timestamp`, `requestId`, `user_id`, `signature`).
    fn fingerprint_query() -> Vec<(&'static str, String)> {
        let mut q: Vec<(&'static str, String)> = crate::fingerprint::query_fingerprint()
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        q.extend([
            ("current_url", format!("{BASE}/")),
            ("pathname", "/".to_string()),
            ("system", "Windows".to_string()),
            ("version", "1.0.0".to_string()),
        ]);
        q
    }

    async fn new_chat(&self, jwt: &str) -> Result<String, AdapterError> {
        let resp = HTTP
            .post(format!("{BASE}/api/v1/chats/new"))
            .headers(common_headers())
            .bearer_auth(jwt)
            .json(&json!({"title": "New Chat"}))
            .send()
            .await
            .map_err(transport_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_err)?;
        if status.as_u16() != 201 && !status.is_success() {
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("zai jwt rejected"));
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
impl Adapter for ZaiAdapter {
    fn provider_id(&self) -> &'static str {
        "zai"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let jwt = ctx
            .account
            .credentials
            .jwt()
            .ok_or_else(|| AdapterError::protocol_drift("zai account missing jwt"))?
            .to_string();
        let user_id = jwt_claim(&jwt, "id")
            .or_else(|| jwt_claim(&jwt, "sub"))
            .ok_or_else(|| AdapterError::protocol_drift("zai jwt missing user id claim"))?;

        let chat_id = self.new_chat(&jwt).await?;

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let mut messages: Vec<Value> = Vec::with_capacity(rest.len());
        let mut system_lifted = false;
        for m in &rest {
            let text = m.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
            let text = if !system_lifted && m.role == "user" {
                system_lifted = true;
                match &system {
                    Some(s) => format!("{s}\n\nUser: {text}"),
                    None => text,
                }
            } else {
                text
            };
            messages.push(json!({"role": m.role, "content": text}));
        }

        let request_id = Uuid::new_v4().to_string();
        let message_text = messages
            .last()
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let now = now_ms();
        let signature = zai_sign(now, &request_id, &user_id, &message_text);

        let payload = json!({
            "chat_id": chat_id,
            "id": request_id,
            "stream": true,
            "model": ctx.actual_model,
            "messages": messages,
            "features": {
                "image_generation": false,
                "web_search": ctx.request.web_search.unwrap_or(false),
                "auto_web_search": false,
                "preview_mode": true,
                "enable_thinking": ctx.request.reasoning_effort.is_some(),
            },
        });

        let mut query = Self::fingerprint_query();
        query.push(("timestamp", now.to_string()));
        query.push(("requestId", request_id.clone()));
        query.push(("user_id", user_id.clone()));

        let resp = HTTP
            .post(format!("{BASE}/api/chat/completions"))
            .headers(common_headers())
            .bearer_auth(&jwt)
            .header("X-Signature", signature)
            .query(&query)
            .json(&payload)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("zai jwt rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let line_stream = sse::lines(byte_stream(resp));
        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            // Z.ai's documented wire format is the XML tool-use form, but
            // spec scenario S2 pins the bracketed form instead; detect
            // whichever one this stream actually emits.
            let mut interceptor = DualToolCallInterceptor::new();
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = match line { Ok(l) => l, Err(e) => { yield Err(e); return; } };
                let Some(payload) = sse::data_payload(&line) else { continue };
                if payload.is_empty() { continue }
                let Ok(frame) = serde_json::from_str::<Value>(payload) else { continue };
                if frame.get("type").and_then(|v| v.as_str()) != Some("chat:completion") { continue }
                let Some(data) = frame.get("data") else { continue };

                if let Some(err) = data.get("error") {
                    let msg = err.get("message").and_then(|v| v.as_str()).unwrap_or("zai upstream error").to_string();
                    yield Ok(AdapterEvent::Error(msg));
                    break;
                }

                let phase = data.get("phase").and_then(|v| v.as_str()).unwrap_or("");
                if let Some(delta) = data.get("delta_content").and_then(|v| v.as_str()) {
                    for ev in interceptor.push(delta) { yield Ok(ev); }
                }
                if phase == "done" || data.get("done").and_then(|v| v.as_bool()) == Some(true) {
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
