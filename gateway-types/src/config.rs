use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    RoundRobin,
    FillFirst,
    Failover,
}

impl Default for BalanceStrategy {
    fn default() -> Self {
        BalanceStrategy::RoundRobin
    }
}

/// Singleton proxy configuration; lifecycle spans the process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub balance_strategy: BalanceStrategy,
    /// Public model name -> (providerId?, accountId?, actualModel) overrides,
    /// layered on top of each provider's own `model_mapping`.
    #[serde(default)]
    pub model_mapping_overrides: Vec<ModelMappingOverride>,
    pub request_timeout_secs: u64,
    pub retry_count: u32,
    pub enable_api_key: bool,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    pub log_retention_days: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMappingOverride {
    pub public_model: String,
    pub provider_id: Option<String>,
    pub account_id: Option<String>,
    pub actual_model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub last_used_at_ms: Option<i64>,
    pub usage_count: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            balance_strategy: BalanceStrategy::RoundRobin,
            model_mapping_overrides: Vec::new(),
            request_timeout_secs: 120,
            retry_count: 3,
            enable_api_key: false,
            api_keys: Vec::new(),
            log_retention_days: 7,
        }
    }
}
