//! Axum app: shared state and route table.

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

use gateway_core::model_catalog::{CachedCatalog, ModelsDevCatalog};
use gateway_core::AdapterRegistry;
use gateway_store::Store;

use crate::routes::{chat, health, models};
use crate::stats::Stats;

/// How long a terminal vendor failure keeps an account out of the
/// `failover` balancer's rotation.
const FAILOVER_COOLDOWN: Duration = Duration::from_secs(60);

/// Shared across every request: the credential store, the resolved adapter
/// registry (one `Arc<dyn Adapter>` per built-in provider), the in-memory
/// counters `GET /stats` reports, and the recent-failure timestamps the
/// `failover` balance strategy consults.
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<AdapterRegistry>,
    pub stats: Arc<Stats>,
    pub model_catalog: Arc<CachedCatalog<ModelsDevCatalog>>,
    recent_failures: DashMap<String, Instant>,
}

impl AppState {
    pub fn new(store: Arc<Store>, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            store,
            registry,
            stats: Arc::new(Stats::new()),
            model_catalog: Arc::new(CachedCatalog::new(ModelsDevCatalog::new())),
            recent_failures: DashMap::new(),
        }
    }

    pub fn note_failure(&self, account_id: &str) {
        self.recent_failures.insert(account_id.to_string(), Instant::now());
    }

    pub fn failed_recently(&self, account_id: &str) -> bool {
        self.recent_failures
            .get(account_id)
            .map(|t| t.elapsed() < FAILOVER_COOLDOWN)
            .unwrap_or(false)
    }
}

/// Builds the full route table. CORS is permissive (any origin/method/
/// header); preflight `OPTIONS` requests are answered by `CorsLayer`
/// itself with 204.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/:id", get(models::get_model))
        .route("/health", get(health::health))
        .route("/stats", get(health::stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::api_key_gate,
        ))
        .layer(cors)
        .with_state(state)
}
