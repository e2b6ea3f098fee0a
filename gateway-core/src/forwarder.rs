//! Request forwarder: retry loop, adapter dispatch, and the
//! exactly-once session-teardown hook the design notes call for in place of
//! the source's "override `stream.end`" trick.

use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::error::{AdapterError, ErrorKind};
use futures::stream::BoxStream;
use futures_util::StreamExt;
use gateway_types::Account;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream_event::AdapterEvent;
use tracing::{info, warn};

/// Fixed delay between retry attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Successful dispatch: a normalized event stream with the session-delete
/// hook already wired in, plus how long the handshake (pre-first-byte) took.
pub struct ForwardSuccess {
    pub events: BoxStream<'static, Result<AdapterEvent, AdapterError>>,
    pub latency: Duration,
}

/// Terminal failure surfaced to the HTTP layer.
pub struct ForwardFailure {
    pub error: AdapterError,
    pub latency: Duration,
}

/// Drives up to `1 + retry_count` attempts of `adapter.chat(ctx)` against the
/// same account (the selector is not re-invoked across retries — the hot
/// token cache stays warm). Retries only on [`AdapterError::is_retryable`];
/// a fixed 5s delay separates attempts.
pub async fn dispatch(
    adapter: Arc<dyn Adapter>,
    ctx_factory: impl Fn() -> ChatContext,
    account: Account,
    retry_count: u32,
) -> Result<ForwardSuccess, ForwardFailure> {
    let start = Instant::now();
    let mut last_err: Option<AdapterError> = None;

    for attempt in 0..=retry_count {
        if attempt > 0 {
            info!(attempt, account_id = %account.id, "retrying chat dispatch after delay");
            tokio::time::sleep(RETRY_DELAY).await;
        }
        let ctx = ctx_factory();
        match adapter.chat(ctx).await {
            Ok(outcome) => {
                let latency = start.elapsed();
                let events = wrap_with_teardown(adapter.clone(), account.clone(), outcome);
                return Ok(ForwardSuccess { events, latency });
            }
            Err(err) => {
                warn!(
                    attempt,
                    account_id = %account.id,
                    kind = ?err.kind,
                    message = %err.message,
                    "adapter chat attempt failed"
                );
                let retryable = err.is_retryable();
                last_err = Some(err);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(ForwardFailure {
        error: last_err.unwrap_or_else(|| AdapterError::new(ErrorKind::Transport, "no attempts made")),
        latency: start.elapsed(),
    })
}

/// Wraps the adapter's event stream so that, regardless of how it ends
/// (exhausted, error, or the consumer dropping it early on client
/// disconnect), the account's `delete_session_after_chat` teardown fires
/// exactly once.
fn wrap_with_teardown(
    adapter: Arc<dyn Adapter>,
    account: Account,
    outcome: ChatOutcome,
) -> BoxStream<'static, Result<AdapterEvent, AdapterError>> {
    if !account.delete_session_after_chat {
        return outcome.events;
    }
    let session = outcome.session;
    let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let guard = TeardownGuard {
        adapter: adapter.clone(),
        account: account.clone(),
        session: session.clone(),
        fired: fired.clone(),
    };
    let inner = outcome.events;
    async_stream::stream! {
        let _guard = guard;
        futures::pin_mut!(inner);
        while let Some(item) = inner.next().await {
            yield item;
        }
    }
    .boxed()
}

/// Fires `adapter.delete` from `Drop`, so it runs whether the stream ended
/// normally, errored, or was dropped mid-iteration by a client disconnect.
/// `delete` itself is synchronous-looking from the caller's perspective but
/// the vendor call is async; we spawn it so `Drop` never blocks.
struct TeardownGuard {
    adapter: Arc<dyn Adapter>,
    account: Account,
    session: SessionHandle,
    fired: Arc<std::sync::atomic::AtomicBool>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let adapter = self.adapter.clone();
        let account = self.account.clone();
        let session = self.session.clone();
        tokio::spawn(async move {
            let ok = adapter.delete(&account, &session).await;
            if !ok {
                warn!(account_id = %account.id, "session teardown reported failure (best-effort, ignored)");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChatContext;
    use crate::openai::ChatCompletionRequest;
    use async_trait::async_trait;
    use futures::stream;
    use gateway_types::{Account, AccountStatus, Credential, Provider};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        calls: Arc<AtomicU32>,
        fail_times: u32,
    }

    #[async_trait]
    impl Adapter for FlakyAdapter {
        fn provider_id(&self) -> &'static str {
            "test"
        }

        async fn chat(&self, _ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(AdapterError::vendor_busy("busy", 429));
            }
            Ok(ChatOutcome {
                events: stream::iter(vec![Ok(AdapterEvent::Finish(stream_event::FinishReason::Stop))]).boxed(),
                session: SessionHandle::new(),
            })
        }

        async fn delete(&self, _account: &Account, _session: &SessionHandle) -> bool {
            true
        }
    }

    fn account() -> Account {
        Account {
            id: "a1".to_string(),
            provider_id: "test".to_string(),
            display_name: "a1".to_string(),
            credentials: Credential::new(),
            status: AccountStatus::Active,
            last_used_ms: None,
            request_count: 0,
            daily_limit: None,
            today_used: 0,
            delete_session_after_chat: false,
            created_at_ms: 0,
        }
    }

    fn ctx() -> ChatContext {
        ChatContext {
            request: ChatCompletionRequest {
                model: "m".into(),
                messages: vec![],
                stream: true,
                temperature: None,
                top_p: None,
                n: None,
                stop: None,
                max_tokens: None,
                presence_penalty: None,
                frequency_penalty: None,
                logit_bias: None,
                user: None,
                tools: None,
                tool_choice: None,
                web_search: None,
                reasoning_effort: None,
                deep_research: None,
            },
            actual_model: "m".into(),
            account: account(),
            provider: Provider {
                id: "test".into(),
                name: "test".into(),
                kind: gateway_types::ProviderKind::Builtin,
                auth_scheme: gateway_types::AuthScheme::Token,
                base_endpoint: "https://example.test".into(),
                chat_path: "/chat".into(),
                default_headers: Default::default(),
                supported_models: vec![],
                model_mapping: Default::default(),
                enabled: true,
                token_check: None,
                credential_fields: vec![],
            },
        }
    }

    #[tokio::test]
    async fn retries_on_vendor_busy_and_eventually_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let adapter: Arc<dyn Adapter> = Arc::new(FlakyAdapter {
            calls: calls.clone(),
            fail_times: 2,
        });
        let result = dispatch(adapter, ctx, account(), 3).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_4xx_is_not_retried() {
        struct RejectAdapter(Arc<AtomicU32>);
        #[async_trait]
        impl Adapter for RejectAdapter {
            fn provider_id(&self) -> &'static str {
                "test"
            }
            async fn chat(&self, _ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::vendor_reject("bad request", 400))
            }
            async fn delete(&self, _account: &Account, _session: &SessionHandle) -> bool {
                true
            }
        }
        let calls = Arc::new(AtomicU32::new(0));
        let adapter: Arc<dyn Adapter> = Arc::new(RejectAdapter(calls.clone()));
        let result = dispatch(adapter, ctx, account(), 3).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
