//! Model context/output limit catalog, sourced from models.dev and cached in
//! memory. Used only to annotate `GET /v1/models` with capability metadata
//! when known; absent entries are omitted rather than treated as an error.
//!
//! HTTP access goes through the [`HttpClient`] trait so tests can substitute
//! a scripted fake instead of hitting the network, the same seam the
//! forwarder's adapters use for vendor calls.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_types::ModelSpec;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MODELS_DEV_URL: &str = "https://models.dev/api.json";

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, String>;
}

pub struct ReqwestHttpClient;

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<String, String> {
        crate::adapters::support::HTTP
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .text()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn resolve(&self, provider_id: &str, model_id: &str) -> Option<ModelSpec>;
}

/// Resolves model specs from the models.dev API, keyed `provider_id/model_id`.
pub struct ModelsDevCatalog {
    base_url: String,
    http_client: Arc<dyn HttpClient>,
}

impl ModelsDevCatalog {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_MODELS_DEV_URL.to_string(),
            http_client: Arc::new(ReqwestHttpClient),
        }
    }

    pub fn with_client(base_url: String, http_client: Arc<dyn HttpClient>) -> Self {
        Self { base_url, http_client }
    }

    pub async fn fetch_all(&self) -> Result<std::collections::HashMap<String, ModelSpec>, String> {
        let body = self.http_client.get(&self.base_url).await?;
        parse_all_models(&body)
    }

    fn resolve_from_json(&self, json: &Value, provider_id: &str, model_id: &str) -> Option<ModelSpec> {
        let provider = json.get(provider_id)?;
        let models = provider.get("models")?.as_object()?;
        let model = models.get(model_id).or_else(|| {
            if !model_id.contains('/') {
                models.get(&format!("{provider_id}/{model_id}"))
            } else {
                None
            }
        })?;
        parse_model_limit(model)
    }
}

impl Default for ModelsDevCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelCatalog for ModelsDevCatalog {
    async fn resolve(&self, provider_id: &str, model_id: &str) -> Option<ModelSpec> {
        let body = self.http_client.get(&self.base_url).await.ok()?;
        let json: Value = serde_json::from_str(&body).ok()?;
        self.resolve_from_json(&json, provider_id, model_id)
    }
}

fn parse_model_limit(model: &Value) -> Option<ModelSpec> {
    let limit = model.get("limit")?;
    let context = limit.get("context")?.as_u64()? as u32;
    let output = limit.get("output")?.as_u64()? as u32;
    let mut spec = ModelSpec::new(context, output);
    spec.cache_read = limit.get("cache_read").and_then(|v| v.as_u64()).map(|v| v as u32);
    spec.cache_write = limit.get("cache_write").and_then(|v| v.as_u64()).map(|v| v as u32);
    Some(spec)
}

fn parse_all_models(body: &str) -> Result<std::collections::HashMap<String, ModelSpec>, String> {
    let json: Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let providers = json.as_object().ok_or("root is not an object")?;
    let mut out = std::collections::HashMap::new();
    for (provider_id, provider) in providers {
        let Some(models) = provider.get("models").and_then(|m| m.as_object()) else {
            continue;
        };
        for (model_id, model) in models {
            if let Some(spec) = parse_model_limit(model) {
                out.insert(format!("{provider_id}/{model_id}"), spec);
            }
        }
    }
    Ok(out)
}

/// Wraps any [`ModelCatalog`] with an in-memory cache so repeated
/// `/v1/models` requests don't each trigger a network round trip.
pub struct CachedCatalog<C> {
    inner: C,
    cache: DashMap<String, ModelSpec>,
}

impl<C: ModelCatalog> CachedCatalog<C> {
    pub fn new(inner: C) -> Self {
        Self { inner, cache: DashMap::new() }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn refresh(&self, specs: std::collections::HashMap<String, ModelSpec>) {
        for (k, v) in specs {
            self.cache.insert(k, v);
        }
    }

    /// Consults the cache only, never the network — safe to call from a hot
    /// request path. Populate the cache via [`Self::refresh`] beforehand.
    pub fn resolve_cached(&self, provider_id: &str, model_id: &str) -> Option<ModelSpec> {
        self.cache.get(&format!("{provider_id}/{model_id}")).map(|e| e.clone())
    }
}

#[async_trait]
impl<C: ModelCatalog> ModelCatalog for CachedCatalog<C> {
    async fn resolve(&self, provider_id: &str, model_id: &str) -> Option<ModelSpec> {
        let key = format!("{provider_id}/{model_id}");
        if let Some(spec) = self.cache.get(&key) {
            return Some(spec.clone());
        }
        let spec = self.inner.resolve(provider_id, model_id).await?;
        self.cache.insert(key, spec.clone());
        Some(spec)
    }
}

/// Spawns a background task that periodically refreshes a cached
/// `ModelsDevCatalog` from the network.
pub fn spawn_refresher(cached: Arc<CachedCatalog<ModelsDevCatalog>>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Ok(specs) = cached.inner().fetch_all().await {
                cached.refresh(specs).await;
                tracing::debug!("model catalog refreshed from models.dev");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockHttpClient {
        body: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(&self, _url: &str) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    fn fixture() -> String {
        r#"{"zai":{"models":{"glm-4.6":{"limit":{"context":204800,"output":131072}}}}}"#.to_string()
    }

    #[tokio::test]
    async fn resolves_by_provider_and_model_id() {
        let client = Arc::new(MockHttpClient { body: fixture(), calls: AtomicUsize::new(0) });
        let catalog = ModelsDevCatalog::with_client("https://x.test/api.json".into(), client);
        let spec = catalog.resolve("zai", "glm-4.6").await.unwrap();
        assert_eq!(spec.context_limit, 204_800);
        assert_eq!(spec.output_limit, 131_072);
    }

    #[tokio::test]
    async fn unknown_model_resolves_to_none() {
        let client = Arc::new(MockHttpClient { body: fixture(), calls: AtomicUsize::new(0) });
        let catalog = ModelsDevCatalog::with_client("https://x.test/api.json".into(), client);
        assert!(catalog.resolve("zai", "nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn cache_hit_avoids_a_second_network_call() {
        let client = Arc::new(MockHttpClient { body: fixture(), calls: AtomicUsize::new(0) });
        let catalog = CachedCatalog::new(ModelsDevCatalog::with_client("https://x.test/api.json".into(), client.clone()));

        catalog.resolve("zai", "glm-4.6").await.unwrap();
        catalog.resolve("zai", "glm-4.6").await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_cached_never_touches_the_network() {
        let client = Arc::new(MockHttpClient { body: fixture(), calls: AtomicUsize::new(0) });
        let catalog = CachedCatalog::new(ModelsDevCatalog::with_client("https://x.test/api.json".into(), client.clone()));
        assert!(catalog.resolve_cached("zai", "glm-4.6").is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        catalog.refresh(std::collections::HashMap::from([("zai/glm-4.6".to_string(), ModelSpec::new(204_800, 131_072))])).await;
        let spec = catalog.resolve_cached("zai", "glm-4.6").unwrap();
        assert_eq!(spec.context_limit, 204_800);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
