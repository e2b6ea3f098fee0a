//! `POST /v1/chat/completions`: resolves the model, selects an account,
//! dispatches through the forwarder, and renders the result as OpenAI SSE
//! or a single `chat.completion` object.

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    response::Response,
    Json,
};
use gateway_core::adapter::ChatContext;
use gateway_core::openai::ChatCompletionRequest;
use gateway_core::{forwarder, selector, AdapterError};
use gateway_types::{now_ms, LogEntry, LogLevel};
use std::sync::Arc;
use std::time::Instant;
use stream_event::ChunkEnvelope;
use tracing::Instrument;
use uuid::Uuid;

use crate::app::AppState;
use crate::model_resolution::{resolve_model, ResolveError};
use crate::sse_response::{aggregate, streaming_response, EventStream};

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("chat_completions", request_id = %request_id, model = %request.model);
    let ctx = RequestLogContext {
        state,
        request_id,
        method: method.to_string(),
        path: uri.path().to_string(),
        started: Instant::now(),
    };
    handle(ctx, request).instrument(span).await
}

/// Everything [`RequestLogContext::finish`] needs that isn't already
/// implied by the response it's logging.
struct RequestLogContext {
    state: Arc<AppState>,
    request_id: String,
    method: String,
    path: String,
    started: Instant,
}

async fn handle(ctx: RequestLogContext, request: ChatCompletionRequest) -> Response {
    let state = ctx.state.clone();
    let resolved = match resolve_model(&state.store, &request.model).await {
        Ok(r) => r,
        Err(ResolveError::Unknown(model)) => {
            return ctx.finish(
                error_response(
                    StatusCode::NOT_FOUND,
                    &format!("model '{model}' is not mapped to any enabled provider"),
                    "model_not_found",
                ),
                None,
                None,
                None,
            )
        }
        Err(ResolveError::Store(e)) => {
            tracing::error!("store error resolving model: {e}");
            return ctx.finish(
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error", "internal_error"),
                None,
                None,
                None,
            );
        }
    };

    let config = match state.store.get_config().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("store error loading config: {e}");
            return ctx.finish(
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error", "internal_error"),
                None,
                Some(resolved.provider_id.clone()),
                None,
            );
        }
    };

    let mut accounts = match state.store.list_accounts_for_provider(&resolved.provider_id).await {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("store error listing accounts: {e}");
            return ctx.finish(
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error", "internal_error"),
                None,
                Some(resolved.provider_id.clone()),
                None,
            );
        }
    };
    if let Some(account_id) = &resolved.account_id {
        accounts.retain(|a| &a.id == account_id);
    }

    let state_for_failover = state.clone();
    let account = selector::select_account(&accounts, config.balance_strategy, &move |id| {
        state_for_failover.failed_recently(id)
    });
    let Some(account) = account else {
        let err = AdapterError::internal_policy(format!("no eligible account for provider '{}'", resolved.provider_id));
        let response = openai_error_response(&err);
        return ctx.finish(response, None, Some(resolved.provider_id.clone()), None);
    };

    let Ok(Some(provider)) = state.store.get_provider(&resolved.provider_id).await else {
        return ctx.finish(
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "provider record missing", "internal_error"),
            Some(account.id.clone()),
            Some(resolved.provider_id.clone()),
            None,
        );
    };

    let Some(adapter) = state.registry.get(&resolved.provider_id) else {
        let err = AdapterError::protocol_drift(format!("no adapter registered for provider '{}'", resolved.provider_id));
        let response = openai_error_response(&err);
        return ctx.finish(response, Some(account.id.clone()), Some(resolved.provider_id.clone()), None);
    };

    let guard = state.stats.begin_request(&request.model, &resolved.provider_id, &account.id);

    let actual_model = resolved.actual_model.clone();
    let ctx_factory = {
        let request = request.clone();
        let account = account.clone();
        let provider = provider.clone();
        move || ChatContext {
            request: request.clone(),
            actual_model: actual_model.clone(),
            account: account.clone(),
            provider: provider.clone(),
        }
    };

    let dispatch_result = forwarder::dispatch(adapter, ctx_factory, account.clone(), config.retry_count).await;

    let envelope = ChunkEnvelope::new(format!("chatcmpl-{}", ctx.request_id), now_ms() / 1000, request.model.clone());

    match dispatch_result {
        Ok(success) => {
            if let Err(e) = state.store.record_dispatch(&account.id, now_ms()).await {
                tracing::warn!("failed to record account dispatch bookkeeping: {e}");
            }
            if request.stream {
                let events: EventStream = wrap_with_stats(success.events, guard);
                let response = streaming_response(events, envelope);
                ctx.finish(response, Some(account.id.clone()), Some(resolved.provider_id.clone()), None)
            } else {
                let response = aggregate(success.events, envelope).await;
                guard.success();
                let response = (StatusCode::OK, Json(response)).into_response();
                ctx.finish(response, Some(account.id.clone()), Some(resolved.provider_id.clone()), None)
            }
        }
        Err(failure) => {
            state.note_failure(&account.id);
            guard.failure();
            let detail = failure.error.message.clone();
            let response = openai_error_response(&failure.error);
            ctx.finish(response, Some(account.id.clone()), Some(resolved.provider_id.clone()), Some(detail))
        }
    }
}

impl RequestLogContext {
    /// Writes the one terminal log every request produces — `(method, path,
    /// status, latency, accountId, providerId, requestId)`, plus the vendor
    /// body snippet on errors — then returns `response` unchanged. The log
    /// write itself runs detached so it never adds latency to the request
    /// path.
    fn finish(
        self,
        response: Response,
        account_id: Option<String>,
        provider_id: Option<String>,
        error_detail: Option<String>,
    ) -> Response {
        let status = response.status().as_u16();
        let latency_ms = self.started.elapsed().as_millis() as i64;
        let level = if status >= 500 {
            LogLevel::Error
        } else if status >= 400 {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        let message = format!("{} {} {status} {latency_ms}ms", self.method, self.path);
        let mut data = std::collections::HashMap::new();
        data.insert("method".to_string(), serde_json::json!(self.method));
        data.insert("path".to_string(), serde_json::json!(self.path));
        data.insert("status".to_string(), serde_json::json!(status));
        data.insert("latencyMs".to_string(), serde_json::json!(latency_ms));
        if let Some(detail) = &error_detail {
            data.insert("vendorBody".to_string(), serde_json::json!(detail));
        }

        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            level,
            message,
            account_id,
            provider_id,
            request_id: Some(self.request_id),
            data: Some(data),
        };
        let store = self.state.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append_log(&entry).await {
                tracing::warn!("failed to persist terminal request log: {e}");
            }
        });

        response
    }
}

/// Wraps the forwarder's event stream so the request guard records success
/// once the stream is fully drained; a client disconnect that drops the
/// stream early instead falls through to the guard's `Drop` impl, which
/// records a failure — the stats bookkeeping still has to resolve even
/// when the client walks away mid-stream.
fn wrap_with_stats(events: EventStream, guard: crate::stats::RequestGuard) -> EventStream {
    use futures_util::StreamExt;
    async_stream::stream! {
        futures::pin_mut!(events);
        while let Some(item) = events.next().await {
            yield item;
        }
        guard.success();
    }
    .boxed()
}

fn error_response(status: StatusCode, message: &str, code: &str) -> Response {
    let body = serde_json::json!({"error": {"message": message, "type": "invalid_request_error", "code": code}});
    (status, Json(body)).into_response()
}

fn openai_error_response(err: &AdapterError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(err.to_openai_error())).into_response()
}
