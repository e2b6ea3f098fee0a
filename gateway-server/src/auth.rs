//! Inbound API-key gate.
//!
//! Enforced only when `AppConfig::enable_api_key` is set and at least one
//! key is configured. Accepts the key from `Authorization: Bearer <k>`,
//! `?api_key=<k>`, or `X-API-Key: <k>`, in that order. `/health` stays
//! public regardless, so monitoring never needs a key.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::app::AppState;

fn extract_key(req: &Request<Body>) -> Option<String> {
    if let Some(auth) = req.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = auth.to_str() {
            if let Some(stripped) = s.strip_prefix("Bearer ") {
                return Some(stripped.to_string());
            }
        }
    }
    if let Some(k) = req.headers().get("x-api-key") {
        if let Ok(s) = k.to_str() {
            return Some(s.to_string());
        }
    }
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(v) = pair.strip_prefix("api_key=") {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn denied(code: &'static str) -> Response {
    let body = serde_json::json!({"error": {"code": code}});
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}

pub async fn api_key_gate(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let config = match state.store.get_config().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config for api-key gate: {e}");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !config.enable_api_key || config.api_keys.is_empty() {
        return next.run(req).await;
    }

    let Some(key) = extract_key(&req) else {
        return denied("missing_api_key");
    };
    let matched = config.api_keys.iter().any(|k| k.key == key);
    if !matched {
        return denied("invalid_api_key");
    }

    let store = state.store.clone();
    let key_value = key.clone();
    tokio::spawn(async move {
        if let Ok(mut cfg) = store.get_config().await {
            if let Some(entry) = cfg.api_keys.iter_mut().find(|k| k.key == key_value) {
                entry.usage_count += 1;
                entry.last_used_at_ms = Some(gateway_types::now_ms());
                let _ = store.save_config(&cfg).await;
            }
        }
    });

    next.run(req).await
}
