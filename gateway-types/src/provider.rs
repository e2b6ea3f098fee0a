use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Built-in vendors ship a fixed descriptor that is force-updated on store
/// start-up; `Custom` providers are user-defined and left untouched by
/// reconciliation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Builtin,
    Custom,
}

/// Which credential shape an adapter expects out of [`Account::credentials`].
/// The store itself still persists a string-keyed credentials map (forward
/// compatible with unknown
/// providers), but every built-in provider declares the scheme its adapter
/// requires so `gateway-core` can validate instead of silently misreading a
/// field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    UserToken,
    RefreshToken,
    Jwt,
    RealUserIdToken,
    TongyiSsoTicket,
    Cookie,
    Token,
    OAuth,
}

/// How to probe whether an account's credentials are still valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenCheck {
    pub endpoint: String,
    pub method: String,
}

/// A vendor integration descriptor (DeepSeek, GLM, Kimi, MiniMax, Qwen,
/// Qwen-AI, Z.ai, or a user-added custom provider).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Provider {
    /// Stable id, e.g. `"deepseek"`. Unique; deleting a provider cascades to
    /// its accounts (enforced by `gateway-store`).
    pub id: String,
    pub name: String,
    pub kind: ProviderKind,
    pub auth_scheme: AuthScheme,
    pub base_endpoint: String,
    pub chat_path: String,
    /// Headers sent on every request before per-call signing is layered on.
    #[serde(default)]
    pub default_headers: HashMap<String, String>,
    pub supported_models: Vec<String>,
    /// Public model name -> vendor-internal model name.
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    pub enabled: bool,
    #[serde(default)]
    pub token_check: Option<TokenCheck>,
    /// UI-only credential field schema (field name -> human label); carried
    /// through for built-ins so a management UI can render a form, never
    /// consulted by the adapters themselves.
    #[serde(default)]
    pub credential_fields: Vec<String>,
}

impl Provider {
    /// True if `id_or_endpoint` names this provider, either by id or by a
    /// match against its base endpoint host — used by each adapter's
    /// `recognizes` check.
    pub fn recognizes(&self, id_or_endpoint: &str) -> bool {
        self.id == id_or_endpoint || self.base_endpoint.contains(id_or_endpoint)
    }
}
