//! Integration tests for the HTTP surface: binds an ephemeral port via
//! `run_serve_on_listener` and drives it with a real HTTP client, the way
//! gateway_store's own integration tests drive a real SQLite file.
//!
//! These exercise the paths that never reach a live vendor: model
//! resolution, the API-key gate, and the route table shape. Dispatch
//! through a real adapter is covered by gateway_core's own unit tests.

use gateway_store::Store;
use gateway_types::{ApiKey, AppConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;

async fn spawn_server(store: Arc<Store>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        gateway_server::run_serve_on_listener(listener, store).await.unwrap();
    });
    // Give the spawned task a moment to start accepting connections.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    addr
}

async fn open_store_with_builtins() -> Arc<Store> {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    std::mem::forget(file);
    store
        .reconcile_builtin_providers(gateway_core::builtin_providers())
        .await
        .unwrap();
    Arc::new(store)
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_zero_stats_on_a_fresh_server() {
    let store = open_store_with_builtins().await;
    let addr = spawn_server(store).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["statistics"]["totalRequests"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn models_endpoint_lists_enabled_providers_models() {
    let store = open_store_with_builtins().await;
    let addr = spawn_server(store).await;

    let resp = reqwest::get(format!("http://{addr}/v1/models")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "list");
    assert!(body["data"].as_array().unwrap().len() > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_id_is_not_found() {
    let store = open_store_with_builtins().await;
    let addr = spawn_server(store).await;

    let resp = reqwest::get(format!("http://{addr}/v1/models/does-not-exist")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_completions_with_unmapped_model_returns_model_not_found() {
    let store = open_store_with_builtins().await;
    let addr = spawn_server(store).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "totally-unmapped-model",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_completions_with_no_accounts_returns_an_upstream_error_not_a_panic() {
    let store = open_store_with_builtins().await;
    let addr = spawn_server(store).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "deepseek-chat",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error() || resp.status().is_server_error());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn api_key_gate_rejects_missing_key_but_allows_health() {
    let store = open_store_with_builtins().await;
    let mut config = AppConfig::default();
    config.enable_api_key = true;
    config.api_keys.push(ApiKey {
        key: "sk-test-key".into(),
        last_used_at_ms: None,
        usage_count: 0,
    });
    store.save_config(&config).await.unwrap();
    let addr = spawn_server(store).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = reqwest::get(format!("http://{addr}/v1/models")).await.unwrap();
    assert_eq!(resp.status(), 401);

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/v1/models"))
        .bearer_auth("sk-test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
