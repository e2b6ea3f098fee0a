//! Qwen domestic adapter: cookie auth, a
//! single forged-fingerprint request, and a variable-encoding SSE response.

use super::decode::{decode_response, raw_client};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::error::AdapterError;
use crate::fingerprint::query_fingerprint;
use crate::interceptor::xml::XmlToolCallInterceptor;
use crate::openai::split_system_prompt;
use crate::sse;
use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_types::{now_ms, Account};
use once_cell::sync::Lazy;
use serde_json::Value;
use stream_event::AdapterEvent;
use uuid::Uuid;

const BASE: &str = "https://chat2.qianwen.com";

static CLIENT: Lazy<reqwest::Client> = Lazy::new(raw_client);

#[derive(Default)]
pub struct QwenAdapter;

impl QwenAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for QwenAdapter {
    fn provider_id(&self) -> &'static str {
        "qwen"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let ticket = ctx
            .account
            .credentials
            .tongyi_sso_ticket()
            .ok_or_else(|| AdapterError::protocol_drift("qwen account missing tongyi_sso_ticket"))?
            .to_string();

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let user_text = rest
            .iter()
            .map(|m| m.content.as_ref().map(|c| c.as_text()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = match system {
            Some(s) => format!("{s}\n\nUser: {user_text}"),
            None => format!("User: {user_text}"),
        };

        let now = now_ms();
        let nonce = Uuid::new_v4().simple().to_string();
        let query = query_fingerprint();
        let ts = now.to_string();

        let resp = CLIENT
            .get(format!("{BASE}/api/v2/chat"))
            .query(&query)
            .query(&[("nonce", nonce.as_str()), ("ts", ts.as_str()), ("prompt", prompt.as_str()), ("model", ctx.actual_model.as_str())])
            .header("Cookie", format!("tongyi_sso_ticket={ticket}"))
            .send()
            .await
            .map_err(|e| AdapterError::transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("qwen sso ticket rejected"));
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(super::support::classify_error_response(status.as_u16(), &body));
        }

        let decoded = decode_response(resp).await?;
        let line_stream = sse::lines(decoded);

        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = XmlToolCallInterceptor::new();
            let mut longest_seen = String::new();
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = match line { Ok(l) => l, Err(e) => { yield Err(e); return; } };
                let Some(payload) = sse::data_payload(&line) else { continue };
                if payload.is_empty() { continue }
                let Ok(frame) = serde_json::from_str::<Value>(payload) else { continue };

                let event_type = frame.get("event").and_then(|v| v.as_str()).unwrap_or("");
                let mime = frame.get("mime_type").and_then(|v| v.as_str()).unwrap_or("");
                let frame_status = frame.get("status").and_then(|v| v.as_str()).unwrap_or("");

                if mime == "text/plain" || mime == "multi_load/iframe" {
                    if let Some(content) = frame.get("content").and_then(|v| v.as_str()) {
                        if content.len() > longest_seen.len() {
                            let delta = &content[longest_seen.len()..];
                            for ev in interceptor.push(delta) { yield Ok(ev); }
                            longest_seen = content.to_string();
                        }
                    }
                }

                if event_type == "complete" || (mime == "multi_load/iframe" && matches!(frame_status, "complete" | "finished")) {
                    break;
                }
            }
            for ev in interceptor.finish() { yield Ok(ev); }
        });

        Ok(ChatOutcome {
            events,
            session: SessionHandle::new(),
        })
    }

    async fn delete(&self, account: &Account, _session: &SessionHandle) -> bool {
        let Some(ticket) = account.credentials.tongyi_sso_ticket() else { return true };
        let resp = CLIENT
            .post(format!("{BASE}/api/v2/session/delete"))
            .header("Cookie", format!("tongyi_sso_ticket={ticket}"))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }
}
