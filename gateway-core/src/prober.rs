//! Per-provider credential probes: each hits a low-cost endpoint that
//! requires the same auth the chat adapter uses, and classifies the result
//! without attempting a real chat call.
//!
//! Status-code classification is shared across vendors: 2xx with the
//! expected body shape is valid, 401 (or a vendor-specific sentinel code) is
//! expired, anything else is a generic failure worth surfacing to the user
//! rather than silently disabling the account.

use crate::adapters::support::{common_headers, HTTP};
use crate::signing::{glm_sign, minimax_sign};
use gateway_types::{now_ms, Account};
use serde_json::Value;

/// Outcome of probing one account's credentials.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub valid: bool,
    pub error: Option<String>,
    pub user_info: Option<Value>,
}

impl ProbeResult {
    fn ok(user_info: Option<Value>) -> Self {
        Self {
            valid: true,
            error: None,
            user_info,
        }
    }

    fn expired() -> Self {
        Self {
            valid: false,
            error: Some("token expired or rejected".to_string()),
            user_info: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
            user_info: None,
        }
    }
}

/// Dispatches to the vendor-specific probe for `account.provider_id`.
/// Unknown provider ids are treated as a generic failure rather than a
/// panic, since custom providers have no adapter-level probe to run.
pub async fn probe_account(account: &Account) -> ProbeResult {
    match account.provider_id.as_str() {
        "deepseek" => probe_deepseek(account).await,
        "glm" => probe_glm(account).await,
        "kimi" => probe_kimi(account).await,
        "minimax" => probe_minimax(account).await,
        "qwen" => probe_qwen(account).await,
        "qwen-ai" => probe_qwen_ai(account).await,
        "zai" => probe_zai(account).await,
        other => ProbeResult::failed(format!("no probe registered for provider '{other}'")),
    }
}

async fn probe_deepseek(account: &Account) -> ProbeResult {
    let Some(token) = account.credentials.user_token() else {
        return ProbeResult::failed("missing userToken");
    };
    let resp = HTTP
        .get("https://chat.deepseek.com/api/v0/users/current")
        .headers(common_headers())
        .bearer_auth(token)
        .send()
        .await;
    classify(resp, |body| body.get("data").and_then(|d| d.get("biz_data")).cloned()).await
}

async fn probe_glm(account: &Account) -> ProbeResult {
    let Some(refresh_token) = account.credentials.refresh_token() else {
        return ProbeResult::failed("missing refreshToken");
    };
    let now = now_ms();
    let sig = glm_sign(now, "glm_web_client_signature_key");
    let mut headers = common_headers();
    headers.insert("X-Timestamp", sig.timestamp.parse().unwrap());
    headers.insert("X-Nonce", sig.nonce.parse().unwrap());
    headers.insert("X-Sign", sig.sign.parse().unwrap());
    let resp = HTTP
        .post("https://chatglm.cn/chatglm/user-api/user/refresh")
        .headers(headers)
        .json(&serde_json::json!({"refresh_token": refresh_token}))
        .send()
        .await;
    classify(resp, |body| body.get("result").and_then(|r| r.get("access_token")).cloned()).await
}

async fn probe_kimi(account: &Account) -> ProbeResult {
    let Some(token) = account.credentials.jwt() else {
        return ProbeResult::failed("missing token");
    };
    let resp = HTTP
        .get("https://kimi.moonshot.cn/api/pay/subscription")
        .headers(common_headers())
        .bearer_auth(token)
        .send()
        .await;
    classify(resp, |_| Some(Value::Bool(true))).await
}

async fn probe_minimax(account: &Account) -> ProbeResult {
    let Some(jwt) = account.credentials.jwt() else {
        return ProbeResult::failed("missing jwt");
    };
    let resp = HTTP
        .post("https://api.minimaxi.com/v1/api/user/device/register")
        .headers(common_headers())
        .bearer_auth(jwt)
        .query(&crate::fingerprint::query_fingerprint())
        .send()
        .await;
    classify(resp, |body| body.get("deviceIDStr").cloned()).await
}

async fn probe_qwen(account: &Account) -> ProbeResult {
    let Some(ticket) = account.credentials.tongyi_sso_ticket() else {
        return ProbeResult::failed("missing tongyi_sso_ticket");
    };
    let resp = HTTP
        .get("https://chat2.qianwen.com/api/v2/session/page/list")
        .headers(common_headers())
        .header("Cookie", format!("tongyi_sso_ticket={ticket}"))
        .send()
        .await;
    classify(resp, |_| Some(Value::Bool(true))).await
}

async fn probe_qwen_ai(account: &Account) -> ProbeResult {
    let Some(jwt) = account.credentials.jwt() else {
        return ProbeResult::failed("missing jwt");
    };
    let mut headers = common_headers();
    for (name, value) in crate::fingerprint::waf_headers() {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    let resp = HTTP
        .get("https://chat.qwen.ai/api/v2/user")
        .headers(headers)
        .bearer_auth(jwt)
        .send()
        .await;
    classify(resp, |body| body.get("data").cloned()).await
}

async fn probe_zai(account: &Account) -> ProbeResult {
    let Some(jwt) = account.credentials.jwt() else {
        return ProbeResult::failed("missing jwt");
    };
    let resp = HTTP
        .get("https://chat.z.ai/api/v1/auths/")
        .headers(common_headers())
        .bearer_auth(jwt)
        .send()
        .await;
    classify(resp, |body| body.get("id").cloned()).await
}

/// Shared classification: transport failure and non-2xx statuses are
/// mapped to `expired`/`failed`; on success `extract` pulls whatever
/// body slice counts as `userInfo` for that vendor.
async fn classify(
    resp: Result<reqwest::Response, reqwest::Error>,
    extract: impl FnOnce(&Value) -> Option<Value>,
) -> ProbeResult {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => return ProbeResult::failed(format!("transport error: {e}")),
    };
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    if status.as_u16() == 401 {
        return ProbeResult::expired();
    }
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body_text)
            .ok()
            .and_then(|v| crate::error::extract_vendor_message(&v))
            .unwrap_or_else(|| body_text.chars().take(200).collect());
        return ProbeResult::failed(message);
    }
    let parsed: Option<Value> = serde_json::from_str(&body_text).ok();
    let user_info = parsed.as_ref().and_then(extract);
    ProbeResult::ok(user_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{AccountStatus, Credential};

    fn account_with(provider_id: &str, credentials: Credential) -> Account {
        Account {
            id: "a1".to_string(),
            provider_id: provider_id.to_string(),
            display_name: "a1".to_string(),
            credentials,
            status: AccountStatus::Active,
            last_used_ms: None,
            request_count: 0,
            daily_limit: None,
            today_used: 0,
            delete_session_after_chat: false,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn missing_credential_fails_without_a_network_call() {
        let account = account_with("deepseek", Credential::new());
        let result = probe_account(&account).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("userToken"));
    }

    #[tokio::test]
    async fn unknown_provider_is_a_generic_failure() {
        let account = account_with("not-a-real-provider", Credential::new());
        let result = probe_account(&account).await;
        assert!(!result.valid);
    }
}
