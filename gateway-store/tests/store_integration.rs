//! Integration tests for gateway_store::Store (DB creation, providers, accounts, config, logs).
//! Uses multi_thread runtime so Store's block_in_place is allowed.

use gateway_store::Store;
use gateway_types::{
    Account, AccountStatus, AppConfig, AuthScheme, Credential, LogEntry, LogLevel, Provider,
    ProviderKind,
};
use tempfile::NamedTempFile;

fn sample_provider(id: &str, kind: ProviderKind) -> Provider {
    Provider {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        auth_scheme: AuthScheme::UserToken,
        base_endpoint: format!("https://{id}.example.com"),
        chat_path: "/v0/chat/completion".to_string(),
        default_headers: Default::default(),
        supported_models: vec!["model-a".to_string()],
        model_mapping: Default::default(),
        enabled: true,
        token_check: None,
        credential_fields: vec!["userToken".to_string()],
    }
}

fn sample_account(id: &str, provider_id: &str) -> Account {
    let mut creds = Credential::new();
    creds.set("userToken", "sk-secret-value");
    Account {
        id: id.to_string(),
        provider_id: provider_id.to_string(),
        display_name: id.to_string(),
        credentials: creds,
        status: AccountStatus::Active,
        last_used_ms: None,
        request_count: 0,
        daily_limit: Some(100),
        today_used: 0,
        delete_session_after_chat: false,
        created_at_ms: 1,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn store_open_creates_db_and_reopen_same_path_preserves_data() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();

    let store1 = Store::open(&path).unwrap();
    store1
        .upsert_provider(&sample_provider("deepseek", ProviderKind::Builtin))
        .await
        .unwrap();
    drop(store1);

    let store2 = Store::open(&path).unwrap();
    let providers = store2.list_providers().await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id, "deepseek");
}

#[tokio::test(flavor = "multi_thread")]
async fn credentials_round_trip_encrypted_at_rest() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    store
        .upsert_provider(&sample_provider("deepseek", ProviderKind::Builtin))
        .await
        .unwrap();
    store
        .upsert_account(&sample_account("acct-1", "deepseek"))
        .await
        .unwrap();

    let fetched = store.get_account("acct-1").await.unwrap().unwrap();
    assert_eq!(fetched.credentials.user_token(), Some("sk-secret-value"));

    // The raw on-disk row must never contain the plaintext secret.
    let conn = rusqlite::Connection::open(file.path()).unwrap();
    let raw: String = conn
        .query_row(
            "SELECT credentials FROM accounts WHERE id = ?1",
            rusqlite::params!["acct-1"],
            |row| row.get(0),
        )
        .unwrap();
    assert!(!raw.contains("sk-secret-value"));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_provider_cascades_to_accounts() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    store
        .upsert_provider(&sample_provider("glm", ProviderKind::Builtin))
        .await
        .unwrap();
    store
        .upsert_account(&sample_account("acct-1", "glm"))
        .await
        .unwrap();

    store.delete_provider("glm").await.unwrap();

    assert!(store.get_provider("glm").await.unwrap().is_none());
    assert!(store.get_account("acct-1").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_builtin_providers_preserves_enabled_flag_and_custom_providers() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();

    let mut deepseek = sample_provider("deepseek", ProviderKind::Builtin);
    deepseek.enabled = true;
    store.upsert_provider(&deepseek).await.unwrap();
    store
        .set_account_status("missing", AccountStatus::Active)
        .await
        .unwrap_or(()); // no-op: nothing to assert, just exercising the not-found path is covered elsewhere

    // User disables the provider.
    let mut disabled = store.get_provider("deepseek").await.unwrap().unwrap();
    disabled.enabled = false;
    store.upsert_provider(&disabled).await.unwrap();

    let mut custom = sample_provider("my-custom", ProviderKind::Custom);
    custom.name = "user renamed".to_string();
    store.upsert_provider(&custom).await.unwrap();

    let mut refreshed_builtin = sample_provider("deepseek", ProviderKind::Builtin);
    refreshed_builtin.base_endpoint = "https://chat.deepseek.com".to_string();
    store
        .reconcile_builtin_providers(vec![refreshed_builtin])
        .await
        .unwrap();

    let deepseek_after = store.get_provider("deepseek").await.unwrap().unwrap();
    assert_eq!(deepseek_after.base_endpoint, "https://chat.deepseek.com");
    assert!(!deepseek_after.enabled, "user's disable must survive reconciliation");

    let custom_after = store.get_provider("my-custom").await.unwrap().unwrap();
    assert_eq!(custom_after.name, "user renamed");
}

#[tokio::test(flavor = "multi_thread")]
async fn record_dispatch_bumps_counters_and_last_used() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    store
        .upsert_provider(&sample_provider("kimi", ProviderKind::Builtin))
        .await
        .unwrap();
    store
        .upsert_account(&sample_account("acct-1", "kimi"))
        .await
        .unwrap();

    for _ in 0..3 {
        store.record_dispatch("acct-1", 1_700_000_000_000).await.unwrap();
    }

    let account = store.get_account("acct-1").await.unwrap().unwrap();
    assert_eq!(account.request_count, 3);
    assert_eq!(account.today_used, 3);
    assert_eq!(account.last_used_ms, Some(1_700_000_000_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_daily_usage_zeroes_today_used_only() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    store
        .upsert_provider(&sample_provider("minimax", ProviderKind::Builtin))
        .await
        .unwrap();
    store
        .upsert_account(&sample_account("acct-1", "minimax"))
        .await
        .unwrap();
    store.record_dispatch("acct-1", 1).await.unwrap();
    store.record_dispatch("acct-1", 2).await.unwrap();

    store.reset_daily_usage().await.unwrap();

    let account = store.get_account("acct-1").await.unwrap().unwrap();
    assert_eq!(account.today_used, 0);
    assert_eq!(account.request_count, 2, "cumulative count survives the daily reset");
}

#[tokio::test(flavor = "multi_thread")]
async fn config_defaults_then_round_trips_after_save() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();

    let default = store.get_config().await.unwrap();
    assert_eq!(default.port, AppConfig::default().port);

    let mut updated = default.clone();
    updated.port = 9999;
    updated.enable_api_key = true;
    store.save_config(&updated).await.unwrap();

    let reloaded = store.get_config().await.unwrap();
    assert_eq!(reloaded.port, 9999);
    assert!(reloaded.enable_api_key);
}

#[tokio::test(flavor = "multi_thread")]
async fn logs_list_newest_first_and_prune_by_age() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();

    for (id, ts) in [("l1", 100), ("l2", 200), ("l3", 300)] {
        store
            .append_log(&LogEntry {
                id: id.to_string(),
                timestamp_ms: ts,
                level: LogLevel::Info,
                message: format!("entry {id}"),
                account_id: None,
                provider_id: None,
                request_id: None,
                data: None,
            })
            .await
            .unwrap();
    }

    let logs = store.list_logs(10).await.unwrap();
    assert_eq!(logs.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["l3", "l2", "l1"]);

    let pruned = store.prune_logs_older_than(250).await.unwrap();
    assert_eq!(pruned, 2);
    let remaining = store.list_logs(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "l3");
}
