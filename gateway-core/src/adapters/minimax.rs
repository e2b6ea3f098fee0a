//! MiniMax adapter: device registration, three-header MD5 signing,
//! and a send-then-poll chat model simulating OpenAI streaming.

use super::support::{classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::cache::CoalescingCache;
use crate::error::AdapterError;
use crate::fingerprint::query_fingerprint;
use crate::interceptor::ToolCallInterceptor;
use crate::openai::{flatten_turns, render_labeled_prompt, split_system_prompt};
use crate::signing::{jwt_user_id, minimax_sign};
use async_trait::async_trait;
use gateway_types::{now_ms, Account};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use stream_event::AdapterEvent;

const BASE: &str = "https://api.minimaxi.com";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 60;
const MIN_POLLS_BEFORE_IDLE_STOP: u32 = 5;

#[derive(Clone)]
struct DeviceInfo {
    device_id: String,
    real_user_id: String,
}

pub struct MiniMaxAdapter {
    device_cache: CoalescingCache<String, DeviceInfo>,
}

impl Default for MiniMaxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniMaxAdapter {
    pub fn new() -> Self {
        Self {
            device_cache: CoalescingCache::new(),
        }
    }

    fn resolve_real_user_id(account: &Account, jwt: &str) -> Option<String> {
        account
            .credentials
            .real_user_id()
            .map(|s| s.to_string())
            .or_else(|| jwt_user_id(jwt))
    }

    async fn device(&self, jwt: &str, account: &Account) -> Result<DeviceInfo, AdapterError> {
        let fallback_user_id = Self::resolve_real_user_id(account, jwt);
        let jwt_owned = jwt.to_string();
        self.device_cache
            .get_or_produce(jwt.to_string(), move || async move {
                let query: Vec<(&str, &str)> = query_fingerprint();
                let resp = HTTP
                    .post(format!("{BASE}/v1/api/user/device/register"))
                    .headers(common_headers())
                    .bearer_auth(&jwt_owned)
                    .query(&query)
                    .send()
                    .await
                    .map_err(transport_err)?;
                let status = resp.status();
                let body = resp.text().await.map_err(transport_err)?;
                if !status.is_success() {
                    return Err(classify_error_response(status.as_u16(), &body));
                }
                #[derive(Deserialize)]
                struct DeviceResp {
                    #[serde(rename = "deviceIDStr")]
                    device_id_str: String,
                    #[serde(rename = "realUserID")]
                    real_user_id: Option<String>,
                }
                let parsed: DeviceResp = serde_json::from_str(&body)
                    .map_err(|e| AdapterError::protocol_drift(format!("device register decode: {e}")))?;
                let real_user_id = parsed
                    .real_user_id
                    .or(fallback_user_id)
                    .ok_or_else(|| AdapterError::protocol_drift("unable to resolve realUserID"))?;
                Ok((
                    DeviceInfo {
                        device_id: parsed.device_id_str,
                        real_user_id,
                    },
                    Duration::from_secs(3 * 3600),
                ))
            })
            .await
    }

    async fn signed_post(
        &self,
        jwt: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AdapterError> {
        let body_json = serde_json::to_string(body)
            .map_err(|e| AdapterError::protocol_drift(format!("minimax body encode: {e}")))?;
        let now = now_ms();
        let sig = minimax_sign(now, jwt, &body_json, path);
        let headers = common_headers();
        HTTP.post(format!("{BASE}{path}"))
            .headers(headers)
            .bearer_auth(jwt)
            .header("x-timestamp", sig.x_timestamp)
            .header("x-signature", sig.x_signature)
            .header("yy", sig.yy)
            .query(&query_fingerprint())
            .body(body_json)
            .send()
            .await
            .map_err(transport_err)
    }
}

#[async_trait]
impl Adapter for MiniMaxAdapter {
    fn provider_id(&self) -> &'static str {
        "minimax"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let jwt = ctx
            .account
            .credentials
            .jwt()
            .ok_or_else(|| AdapterError::protocol_drift("minimax account missing jwt"))?
            .to_string();
        let device = self.device(&jwt, &ctx.account).await?;

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let turns = flatten_turns(&rest);
        let text = render_labeled_prompt(system.as_deref(), &turns);

        let send_body = json!({
            "msg_type": 1,
            "text": text,
            "chat_type": 1,
            "device_id": device.device_id,
            "real_user_id": device.real_user_id,
        });
        let resp = self.signed_post(&jwt, "/matrix/api/v1/chat/send_msg", &send_body).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_err)?;
        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("minimax jwt rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }
        #[derive(Deserialize)]
        struct SendResp {
            chat_id: String,
        }
        let parsed: SendResp = serde_json::from_str(&body)
            .map_err(|e| AdapterError::protocol_drift(format!("send_msg decode: {e}")))?;
        let chat_id = parsed.chat_id;

        let jwt_poll = jwt.clone();
        let chat_id_poll = chat_id.clone();
        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = ToolCallInterceptor::new();
            let mut prefix_len = 0usize;
            let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

            for poll in 0..MAX_POLLS {
                tokio::time::sleep(POLL_INTERVAL).await;
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                let detail_body = json!({"chat_id": chat_id_poll});
                let body_json = match serde_json::to_string(&detail_body) {
                    Ok(b) => b,
                    Err(e) => { yield Err(AdapterError::protocol_drift(format!("poll body encode: {e}"))); return; }
                };
                let now = now_ms();
                let sig = minimax_sign(now, &jwt_poll, &body_json, "/matrix/api/v1/chat/get_chat_detail");
                let resp = HTTP
                    .post(format!("{BASE}/matrix/api/v1/chat/get_chat_detail"))
                    .headers(common_headers())
                    .bearer_auth(&jwt_poll)
                    .header("x-timestamp", sig.x_timestamp)
                    .header("x-signature", sig.x_signature)
                    .header("yy", sig.yy)
                    .query(&query_fingerprint())
                    .body(body_json)
                    .send()
                    .await;
                let resp = match resp {
                    Ok(r) => r,
                    Err(e) => { yield Err(transport_err(e)); return; }
                };
                if !resp.status().is_success() {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    yield Err(classify_error_response(status, &body));
                    return;
                }
                let Ok(body) = resp.text().await else { continue };
                let Ok(frame) = serde_json::from_str::<serde_json::Value>(&body) else { continue };
                let Some(messages) = frame.get("messages").and_then(|v| v.as_array()) else { continue };
                let Some(assistant_msg) = messages.iter().rev().find(|m| m.get("msg_type").and_then(|v| v.as_i64()) == Some(2)) else { continue };
                let content = assistant_msg.get("msg_content").and_then(|v| v.as_str()).unwrap_or("");

                if content.len() > prefix_len {
                    let delta = &content[prefix_len..];
                    for ev in interceptor.push(delta) { yield Ok(ev); }
                    prefix_len = content.len();
                } else if poll + 1 >= MIN_POLLS_BEFORE_IDLE_STOP {
                    // No growth on a poll at or past the minimum count: treat as done.
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
