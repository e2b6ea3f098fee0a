//! Vendor adapter implementations and the registry that resolves a
//! provider id to the `Arc<dyn Adapter>` the forwarder dispatches to.

mod decode;
mod deepseek;
mod glm;
mod kimi;
mod minimax;
mod qwen;
mod qwen_ai;
pub mod support;
mod zai;

pub use deepseek::DeepSeekAdapter;
pub use glm::GlmAdapter;
pub use kimi::KimiAdapter;
pub use minimax::MiniMaxAdapter;
pub use qwen::QwenAdapter;
pub use qwen_ai::QwenAiAdapter;
pub use zai::ZaiAdapter;

use crate::adapter::Adapter;
use gateway_store::Store;
use gateway_types::{AuthScheme, Provider, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Holds one constructed adapter per built-in provider id. Custom providers
/// (user-added, OpenAI-compatible passthrough) are out of scope for this
/// registry; the HTTP layer falls back to rejecting unrecognized ids.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn Adapter>> = HashMap::new();
        adapters.insert("deepseek", Arc::new(DeepSeekAdapter::new()));
        adapters.insert("glm", Arc::new(GlmAdapter::new(store)));
        adapters.insert("kimi", Arc::new(KimiAdapter::new()));
        adapters.insert("minimax", Arc::new(MiniMaxAdapter::new()));
        adapters.insert("qwen", Arc::new(QwenAdapter::new()));
        adapters.insert("qwen-ai", Arc::new(QwenAiAdapter::new()));
        adapters.insert("zai", Arc::new(ZaiAdapter::new()));
        Self { adapters }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(provider_id).cloned()
    }
}

/// The fixed descriptor catalog force-updated into the store on start-up.
/// Endpoint/model/credential-field details mirror what each adapter module
/// actually expects out of `Account::credentials`.
pub fn builtin_providers() -> Vec<Provider> {
    vec![
        Provider {
            id: "deepseek".into(),
            name: "DeepSeek".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::UserToken,
            base_endpoint: "https://chat.deepseek.com".into(),
            chat_path: "/api/v0/chat/completion".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["deepseek-chat".into(), "deepseek-reasoner".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/api/v0/users/current".into(),
                method: "GET".into(),
            }),
            credential_fields: vec!["userToken".into()],
        },
        Provider {
            id: "glm".into(),
            name: "GLM".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::RefreshToken,
            base_endpoint: "https://chatglm.cn".into(),
            chat_path: "/backend-api/assistant/stream".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["glm-4".into(), "glm-4-plus".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/chatglm/user-api/user/refresh".into(),
                method: "POST".into(),
            }),
            credential_fields: vec!["refreshToken".into()],
        },
        Provider {
            id: "kimi".into(),
            name: "Kimi".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::Token,
            base_endpoint: "https://kimi.moonshot.cn".into(),
            chat_path: "/api/chat/completion".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["kimi".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/api/user/subscription".into(),
                method: "GET".into(),
            }),
            credential_fields: vec!["token".into()],
        },
        Provider {
            id: "minimax".into(),
            name: "MiniMax".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::RealUserIdToken,
            base_endpoint: "https://api.minimaxi.com".into(),
            chat_path: "/matrix/api/v1/chat/send_msg".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["abab6.5".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/v1/api/user/device/register".into(),
                method: "POST".into(),
            }),
            credential_fields: vec!["jwt".into(), "realUserID".into()],
        },
        Provider {
            id: "qwen".into(),
            name: "Qwen".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::TongyiSsoTicket,
            base_endpoint: "https://chat2.qianwen.com".into(),
            chat_path: "/api/v2/chat".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["qwen-max".into(), "qwen-plus".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/api/v2/session/page/list".into(),
                method: "GET".into(),
            }),
            credential_fields: vec!["tongyi_sso_ticket".into()],
        },
        Provider {
            id: "qwen-ai".into(),
            name: "Qwen (International)".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::Jwt,
            base_endpoint: "https://chat.qwen.ai".into(),
            chat_path: "/api/v2/chat/completions".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["qwen3-max".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/api/v2/user".into(),
                method: "GET".into(),
            }),
            credential_fields: vec!["jwt".into(), "token".into()],
        },
        Provider {
            id: "zai".into(),
            name: "Z.ai".into(),
            kind: ProviderKind::Builtin,
            auth_scheme: AuthScheme::Jwt,
            base_endpoint: "https://chat.z.ai".into(),
            chat_path: "/api/chat/completions".into(),
            default_headers: HashMap::new(),
            supported_models: vec!["glm-4.6".into()],
            model_mapping: HashMap::new(),
            enabled: true,
            token_check: Some(gateway_types::TokenCheck {
                endpoint: "/api/v1/auths/".into(),
                method: "GET".into(),
            }),
            credential_fields: vec!["jwt".into()],
        },
    ]
}
