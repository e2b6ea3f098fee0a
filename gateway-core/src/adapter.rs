//! The vendor adapter contract: a single trait every vendor
//! implements, generalizing the source's duck-typed `handleStream`/
//! `handleNonStream` convention into one polymorphic interface the forwarder
//! can drive without knowing which vendor it's talking to.

use crate::error::AdapterError;
use crate::openai::ChatCompletionRequest;
use async_trait::async_trait;
use futures::stream::BoxStream;
use gateway_types::{Account, Provider};
use std::collections::HashMap;
use stream_event::AdapterEvent;

/// Everything one `chat()` call needs: the incoming request, the resolved
/// vendor-internal model name, and the account/provider pair selected by the
/// balancer.
pub struct ChatContext {
    pub request: ChatCompletionRequest,
    pub actual_model: String,
    pub account: Account,
    pub provider: Provider,
}

/// Vendor-side identifiers created during `chat()` that `delete()` later
/// needs to tear a session down. Kept as
/// a small string map rather than one struct per vendor since each only ever
/// reads the keys it wrote.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle(pub HashMap<String, String>);

impl SessionHandle {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }
}

/// One event from the vendor, already normalized into [`AdapterEvent`] shape,
/// paired with the session handle produced during the pre-chat handshake.
/// Modeling `chat()` as returning this directly (rather than a raw upstream
/// handle plus a separate `StreamHandler`, per the source's two-step design)
/// collapses "construct the matching stream handler" into the adapter
/// itself, since in practice every vendor's framing is unique enough that
/// the handler has no code to share across vendors.
pub struct ChatOutcome {
    pub events: BoxStream<'static, Result<AdapterEvent, AdapterError>>,
    pub session: SessionHandle,
}

/// A per-vendor adapter: owns no request-scoped state (the token/session
/// caches it holds are process-global, keyed by account or credential), and
/// is safe to share across concurrently in-flight requests.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable provider id this adapter serves, e.g. `"deepseek"`.
    fn provider_id(&self) -> &'static str;

    /// True if `provider` should be dispatched to this adapter, by id or
    /// endpoint match.
    fn recognizes(&self, provider: &Provider) -> bool {
        provider.recognizes(self.provider_id())
    }

    /// Performs the full handshake (token, pre-chat RPCs, PoW, signing) and
    /// issues the streaming chat call, returning a normalized event stream.
    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError>;

    /// Best-effort session teardown; never propagates an error, matching the
    /// source's contract ("never throws") — failures are logged and
    /// swallowed by the caller.
    async fn delete(&self, account: &Account, session: &SessionHandle) -> bool;
}
