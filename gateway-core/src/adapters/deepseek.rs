//! DeepSeek adapter: user-token → short-lived bearer, session
//! create, SHA3 proof-of-work, then a streamed chat call whose frames carry
//! a `path`-addressed JSON patch format.

use super::support::{byte_stream, classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::cache::CoalescingCache;
use crate::error::AdapterError;
use crate::interceptor::ToolCallInterceptor;
use crate::openai::{flatten_turns, split_system_prompt};
use crate::pow::{self, PowChallenge};
use crate::sse;
use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_types::Account;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use stream_event::AdapterEvent;

const BASE: &str = "https://chat.deepseek.com/api";

pub struct DeepSeekAdapter {
    access_token_cache: CoalescingCache<String, String>,
    session_cache: CoalescingCache<String, String>,
}

impl Default for DeepSeekAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepSeekAdapter {
    pub fn new() -> Self {
        Self {
            access_token_cache: CoalescingCache::new(),
            session_cache: CoalescingCache::new(),
        }
    }

    async fn access_token(&self, user_token: &str) -> Result<String, AdapterError> {
        self.access_token_cache
            .get_or_produce(user_token.to_string(), || async move {
                let resp = HTTP
                    .get(format!("{BASE}/v0/users/current"))
                    .headers(common_headers())
                    .bearer_auth(user_token)
                    .send()
                    .await
                    .map_err(transport_err)?;
                let status = resp.status();
                let body = resp.text().await.map_err(transport_err)?;
                if !status.is_success() {
                    if status.as_u16() == 401 {
                        return Err(AdapterError::auth_expired("deepseek user token rejected"));
                    }
                    return Err(classify_error_response(status.as_u16(), &body));
                }
                #[derive(Deserialize)]
                struct CurrentUser {
                    data: CurrentUserData,
                }
                #[derive(Deserialize)]
                struct CurrentUserData {
                    biz_data: BizData,
                }
                #[derive(Deserialize)]
                struct BizData {
                    token: Option<String>,
                }
                let parsed: CurrentUser = serde_json::from_str(&body)
                    .map_err(|e| AdapterError::protocol_drift(format!("users/current decode: {e}")))?;
                let token = parsed
                    .data
                    .biz_data
                    .token
                    .ok_or_else(|| AdapterError::protocol_drift("missing biz_data.token"))?;
                Ok((token, Duration::from_secs(3600)))
            })
            .await
    }

    async fn session_id(&self, account_id: &str, access_token: &str) -> Result<String, AdapterError> {
        self.session_cache
            .get_or_produce(account_id.to_string(), || async move {
                let resp = HTTP
                    .post(format!("{BASE}/v0/chat_session/create"))
                    .headers(common_headers())
                    .bearer_auth(access_token)
                    .json(&json!({"character_id": null}))
                    .send()
                    .await
                    .map_err(transport_err)?;
                let status = resp.status();
                let body = resp.text().await.map_err(transport_err)?;
                if !status.is_success() {
                    return Err(classify_error_response(status.as_u16(), &body));
                }
                #[derive(Deserialize)]
                struct SessionResp {
                    data: SessionData,
                }
                #[derive(Deserialize)]
                struct SessionData {
                    biz_data: SessionBiz,
                }
                #[derive(Deserialize)]
                struct SessionBiz {
                    id: String,
                }
                let parsed: SessionResp = serde_json::from_str(&body)
                    .map_err(|e| AdapterError::protocol_drift(format!("chat_session/create decode: {e}")))?;
                Ok((parsed.data.biz_data.id, Duration::from_secs(300)))
            })
            .await
    }

    async fn pow_header(&self, access_token: &str) -> Result<String, AdapterError> {
        let resp = HTTP
            .post(format!("{BASE}/v0/chat/create_pow_challenge"))
            .headers(common_headers())
            .bearer_auth(access_token)
            .json(&json!({"target_path": "/api/v0/chat/completion"}))
            .send()
            .await
            .map_err(transport_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_err)?;
        if !status.is_success() {
            return Err(classify_error_response(status.as_u16(), &body));
        }
        #[derive(Deserialize)]
        struct ChallengeResp {
            data: ChallengeData,
        }
        #[derive(Deserialize)]
        struct ChallengeData {
            biz_data: ChallengeBiz,
        }
        #[derive(Deserialize)]
        struct ChallengeBiz {
            challenge: ChallengeFields,
        }
        #[derive(Deserialize)]
        struct ChallengeFields {
            algorithm: String,
            challenge: String,
            salt: String,
            difficulty: u32,
            expire_at: i64,
            signature: String,
        }
        let parsed: ChallengeResp = serde_json::from_str(&body)
            .map_err(|e| AdapterError::protocol_drift(format!("pow challenge decode: {e}")))?;
        let c = parsed.data.biz_data.challenge;
        let challenge = PowChallenge {
            algorithm: c.algorithm,
            challenge: c.challenge,
            salt: c.salt,
            difficulty: c.difficulty,
            expire_at: c.expire_at,
            signature: c.signature,
        };
        pow::solve_and_encode(&challenge)
            .ok_or_else(|| AdapterError::protocol_drift("unsupported PoW algorithm or no nonce found in budget"))
    }
}

/// Renders the flattened turns into DeepSeek's role-fence prompt shape
///: assistant turns wrapped in its sentence delimiters, other
/// turns prefixed with the user fence.
fn render_deepseek_prompt(system: Option<&str>, turns: &[crate::openai::FlatTurn]) -> String {
    let mut out = String::new();
    if let Some(s) = system {
        out.push_str("<｜User｜>");
        out.push_str(s);
        out.push('\n');
    }
    for t in turns {
        if t.role == "assistant" {
            out.push_str("<｜Assistant｜>");
            out.push_str(&t.text);
            out.push_str("<｜end of sentence｜>");
        } else {
            out.push_str("<｜User｜>");
            out.push_str(&t.text);
        }
    }
    out
}

#[async_trait]
impl Adapter for DeepSeekAdapter {
    fn provider_id(&self) -> &'static str {
        "deepseek"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let user_token = ctx
            .account
            .credentials
            .user_token()
            .ok_or_else(|| AdapterError::protocol_drift("deepseek account missing user token"))?
            .to_string();

        let access_token = self.access_token(&user_token).await?;
        let session_id = self.session_id(&ctx.account.id, &access_token).await?;
        let pow_header = self.pow_header(&access_token).await?;

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let turns = flatten_turns(&rest);
        let prompt = render_deepseek_prompt(system.as_deref(), &turns);

        let model_lower = ctx.actual_model.to_lowercase();
        let web_search = ctx
            .request
            .web_search
            .unwrap_or_else(|| model_lower.contains("search"));
        let thinking_enabled = ctx
            .request
            .reasoning_effort
            .is_some()
            .then_some(true)
            .unwrap_or_else(|| model_lower.contains("r1") || model_lower.contains("think"));

        let payload = json!({
            "chat_session_id": session_id,
            "parent_message_id": null,
            "prompt": prompt,
            "ref_file_ids": [],
            "search_enabled": web_search,
            "thinking_enabled": thinking_enabled,
        });

        let resp = HTTP
            .post(format!("{BASE}/v0/chat/completion"))
            .headers(common_headers())
            .bearer_auth(&access_token)
            .header("X-Ds-Pow-Response", pow_header)
            .json(&payload)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            self.access_token_cache.evict(&user_token);
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let byte_stream = byte_stream(resp);
        let line_stream = sse::lines(byte_stream);

        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = ToolCallInterceptor::new();
            let mut citations: Vec<(String, String, Option<String>)> = Vec::new();
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => { yield Err(e); return; }
                };
                let Some(payload) = sse::data_payload(&line) else { continue };
                if payload.is_empty() { continue }
                let Ok(frame) = serde_json::from_str::<serde_json::Value>(payload) else { continue };
                let path = frame.get("p").and_then(|v| v.as_str()).unwrap_or("");
                if path == "response/search_results" {
                    if let Some(arr) = frame.get("v").and_then(|v| v.as_array()) {
                        for item in arr {
                            if let (Some(key), Some(url)) = (
                                item.get("match_key").and_then(|v| v.as_str()),
                                item.get("url").and_then(|v| v.as_str()),
                            ) {
                                let title = item.get("title").and_then(|v| v.as_str()).map(str::to_string);
                                citations.push((key.to_string(), url.to_string(), title));
                            }
                        }
                    }
                    continue;
                }
                let Some(delta_raw) = frame.get("v").and_then(|v| v.as_str()) else { continue };
                if delta_raw == "FINISHED" { continue }
                let cleaned = rewrite_citation_markers(delta_raw, &citations);
                if path.contains("thinking") {
                    yield Ok(AdapterEvent::ReasoningDelta(cleaned));
                } else {
                    for ev in interceptor.push(&cleaned) {
                        yield Ok(ev);
                    }
                }
            }
            if !citations.is_empty() && !interceptor.has_emitted_tool_call() {
                for ev in interceptor.push(&citations_footer(&citations)) {
                    yield Ok(ev);
                }
            }
            for ev in interceptor.finish() {
                yield Ok(ev);
            }
        });

        Ok(ChatOutcome {
            events,
            session: SessionHandle::new().with("session_id", session_id).with("access_token", access_token),
        })
    }

    async fn delete(&self, account: &Account, session: &SessionHandle) -> bool {
        let Some(session_id) = session.get("session_id") else { return true };
        let Some(access_token) = session.get("access_token") else { return true };
        self.session_cache.evict(&account.id.clone());
        let resp = HTTP
            .post(format!("{BASE}/v0/chat_session/delete"))
            .headers(common_headers())
            .bearer_auth(access_token)
            .json(&json!({"chat_session_id": session_id}))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }
}

/// Rewrites `[citation:N]` to `[N]` once the referenced key has a resolved
/// URL; unresolved citation markers are left untouched.
fn rewrite_citation_markers(text: &str, citations: &[(String, String, Option<String>)]) -> String {
    if !text.contains("[citation:") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[citation:") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + "[citation:".len()..];
        if let Some(end) = tail.find(']') {
            let n = &tail[..end];
            if citations.iter().any(|(k, _, _)| k == n) || n.chars().all(|c| c.is_ascii_digit()) {
                out.push('[');
                out.push_str(n);
                out.push(']');
            } else {
                out.push_str("[citation:");
                out.push_str(n);
                out.push(']');
            }
            rest = &tail[end + 1..];
        } else {
            out.push_str("[citation:");
            rest = tail;
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Renders the stream-end citations footer, one line per resolved
/// citation in first-seen order: `[n]: [title](url)`, title falling back
/// to the bare url when the vendor didn't send one.
fn citations_footer(citations: &[(String, String, Option<String>)]) -> String {
    let mut out = String::from("\n\n");
    for (i, (_, url, title)) in citations.iter().enumerate() {
        let label = title.as_deref().unwrap_or(url.as_str());
        out.push_str(&format!("[{}]: [{}]({})\n", i + 1, label, url));
    }
    out
}

#[cfg(test)]
mod citation_tests {
    use super::*;

    #[test]
    fn rewrites_resolved_citation_marker_and_leaves_unresolved_ones() {
        let citations = vec![("1".to_string(), "https://x".to_string(), Some("X".to_string()))];
        let text = rewrite_citation_markers("see [citation:1] and [citation:unresolved]", &citations);
        assert_eq!(text, "see [1] and [citation:unresolved]");
    }

    #[test]
    fn footer_falls_back_to_url_when_title_missing() {
        let citations = vec![
            ("1".to_string(), "https://x".to_string(), Some("X".to_string())),
            ("2".to_string(), "https://y".to_string(), None),
        ];
        let footer = citations_footer(&citations);
        assert_eq!(footer, "\n\n[1]: [X](https://x)\n[2]: [https://y](https://y)\n");
    }

    #[test]
    fn text_without_citation_markers_is_untouched() {
        let text = rewrite_citation_markers("no citations here", &[]);
        assert_eq!(text, "no citations here");
    }
}
