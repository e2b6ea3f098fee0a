use crate::Credential;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Expired,
    Error,
}

/// One set of credentials for one provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub provider_id: String,
    pub display_name: String,
    /// Encrypted at rest by `gateway-store`; only ever decrypted in memory
    /// for the duration of one adapter call.
    pub credentials: Credential,
    pub status: AccountStatus,
    pub last_used_ms: Option<i64>,
    pub request_count: u64,
    pub daily_limit: Option<u64>,
    pub today_used: u64,
    pub delete_session_after_chat: bool,
    pub created_at_ms: i64,
}

impl Account {
    /// Eligible iff active and under its (optional) daily quota.
    pub fn is_eligible(&self) -> bool {
        self.status == AccountStatus::Active
            && self.daily_limit.map(|limit| self.today_used < limit).unwrap_or(true)
    }
}
