//! Shared data model for the chat gateway (provider/account/config/log records).
//!
//! These types are the wire/persistence shape shared by `gateway-store` (which
//! persists them), `gateway-core` (which reads them to drive vendor adapters),
//! and `gateway-server` (which exposes slices of them over HTTP). Kept
//! dependency-light on purpose so every crate in the workspace can depend on
//! it without pulling in HTTP or storage machinery.

mod account;
mod config;
mod credential;
mod log;
mod model_spec;
mod provider;

pub use account::{Account, AccountStatus};
pub use config::{ApiKey, AppConfig, BalanceStrategy, ModelMappingOverride};
pub use credential::Credential;
pub use log::{LogEntry, LogLevel};
pub use model_spec::{ModelMapping, ModelSpec, ResolvedModel};
pub use provider::{AuthScheme, Provider, ProviderKind, TokenCheck};

/// Monotonic milliseconds since the Unix epoch, as stored in every timestamp field.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
