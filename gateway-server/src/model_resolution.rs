//! Resolves a public OpenAI-shaped model name to `(providerId?, accountId?,
//! actualModel)` through `AppConfig::model_mapping_overrides` first, then
//! each enabled provider's own `model_mapping` / `supported_models`.

use gateway_store::Store;
use gateway_types::ResolvedModel;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("model '{0}' is not mapped to any enabled provider")]
    Unknown(String),
    #[error("store: {0}")]
    Store(#[from] gateway_store::StoreError),
}

pub async fn resolve_model(store: &Store, requested: &str) -> Result<ResolvedModel, ResolveError> {
    let config = store.get_config().await?;
    if let Some(o) = config
        .model_mapping_overrides
        .iter()
        .find(|o| o.public_model == requested)
    {
        if let Some(provider_id) = &o.provider_id {
            return Ok(ResolvedModel {
                provider_id: provider_id.clone(),
                account_id: o.account_id.clone(),
                actual_model: o.actual_model.clone(),
            });
        }
    }

    let providers = store.list_providers().await?;
    for provider in providers.into_iter().filter(|p| p.enabled) {
        if let Some(vendor_name) = provider.model_mapping.get(requested) {
            return Ok(ResolvedModel {
                provider_id: provider.id,
                account_id: None,
                actual_model: vendor_name.clone(),
            });
        }
        if provider.supported_models.iter().any(|m| m == requested) {
            return Ok(ResolvedModel {
                provider_id: provider.id,
                account_id: None,
                actual_model: requested.to_string(),
            });
        }
    }

    Err(ResolveError::Unknown(requested.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{AppConfig, ModelMappingOverride};

    async fn store_with(providers: Vec<gateway_types::Provider>, config: AppConfig) -> Store {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = Store::open(file.path()).unwrap();
        std::mem::forget(file);
        for p in providers {
            store.upsert_provider(&p).await.unwrap();
        }
        store.save_config(&config).await.unwrap();
        store
    }

    fn provider(id: &str, supported: &[&str], mapping: &[(&str, &str)]) -> gateway_types::Provider {
        gateway_types::Provider {
            id: id.to_string(),
            name: id.to_string(),
            kind: gateway_types::ProviderKind::Builtin,
            auth_scheme: gateway_types::AuthScheme::Token,
            base_endpoint: "https://example.test".into(),
            chat_path: "/chat".into(),
            default_headers: Default::default(),
            supported_models: supported.iter().map(|s| s.to_string()).collect(),
            model_mapping: mapping.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            enabled: true,
            token_check: None,
            credential_fields: vec![],
        }
    }

    #[tokio::test]
    async fn resolves_via_supported_models_list() {
        let store = store_with(vec![provider("deepseek", &["deepseek-chat"], &[])], AppConfig::default()).await;
        let resolved = resolve_model(&store, "deepseek-chat").await.unwrap();
        assert_eq!(resolved.provider_id, "deepseek");
        assert_eq!(resolved.actual_model, "deepseek-chat");
    }

    #[tokio::test]
    async fn resolves_via_provider_model_mapping() {
        let store = store_with(
            vec![provider("glm", &[], &[("gpt-4", "glm-4-plus")])],
            AppConfig::default(),
        )
        .await;
        let resolved = resolve_model(&store, "gpt-4").await.unwrap();
        assert_eq!(resolved.provider_id, "glm");
        assert_eq!(resolved.actual_model, "glm-4-plus");
    }

    #[tokio::test]
    async fn config_override_takes_priority() {
        let mut config = AppConfig::default();
        config.model_mapping_overrides.push(ModelMappingOverride {
            public_model: "gpt-4".into(),
            provider_id: Some("kimi".into()),
            account_id: Some("acct-1".into()),
            actual_model: "kimi".into(),
        });
        let store = store_with(
            vec![provider("glm", &[], &[("gpt-4", "glm-4-plus")])],
            config,
        )
        .await;
        let resolved = resolve_model(&store, "gpt-4").await.unwrap();
        assert_eq!(resolved.provider_id, "kimi");
        assert_eq!(resolved.account_id.as_deref(), Some("acct-1"));
    }

    #[tokio::test]
    async fn unknown_model_is_an_error() {
        let store = store_with(vec![], AppConfig::default()).await;
        assert!(matches!(resolve_model(&store, "nope").await, Err(ResolveError::Unknown(_))));
    }
}
