//! HTTP surface for the chat gateway (axum): `POST /v1/chat/completions`,
//! `GET /v1/models[/:id]`, `GET /health`, `GET /stats`.
//!
//! Built around an axum `Router` + `AppState`, with `run_serve`/
//! `run_serve_on_listener` split so integration tests can bind an ephemeral
//! port; the wire protocol is OpenAI's SSE instead of a bespoke WebSocket
//! envelope.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`router`].

mod app;
mod auth;
mod maintenance;
mod model_resolution;
mod routes;
mod sse_response;
mod stats;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub use app::{router, AppState};
pub use stats::Stats;

use gateway_core::AdapterRegistry;
use gateway_store::Store;

/// Runs the HTTP gateway on an existing listener. Used directly by tests
/// (bind `127.0.0.1:0`, read back the assigned port, then hand the listener
/// here) and indirectly by [`run_serve`].
pub async fn run_serve_on_listener(
    listener: TcpListener,
    store: Arc<Store>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("chat gateway listening on http://{}", addr);

    let registry = Arc::new(AdapterRegistry::new(store.clone()));
    let state = Arc::new(AppState::new(store.clone(), registry));
    gateway_core::model_catalog::spawn_refresher(
        state.model_catalog.clone(),
        std::time::Duration::from_secs(86_400),
    );
    maintenance::spawn_daily_reset(store.clone());
    maintenance::spawn_log_retention(store);
    let app = router(state);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the HTTP gateway, binding `addr` (default `127.0.0.1:8787`, or the
/// store's persisted `AppConfig::port` when `addr` is `None`).
pub async fn run_serve(
    addr: Option<&str>,
    store: Arc<Store>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bound = match addr {
        Some(a) => a.to_string(),
        None => {
            let config = store.get_config().await?;
            format!("0.0.0.0:{}", config.port)
        }
    };
    let listener = TcpListener::bind(&bound).await?;
    run_serve_on_listener(listener, store).await
}
