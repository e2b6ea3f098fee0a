use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single credential value as read out of an account's field map.
///
/// The store persists credentials as an encrypted string-keyed map (forward
/// compatible with providers the binary doesn't know about yet); adapters
/// pull the fields they need through the typed helpers below instead of
/// reaching into the raw map, so a DeepSeek adapter can't accidentally read a
/// GLM refresh token.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Credential(pub HashMap<String, String>);

impl Credential {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(|s| s.as_str())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    /// DeepSeek: long-lived user token.
    pub fn user_token(&self) -> Option<&str> {
        self.get("userToken").or_else(|| self.get("token"))
    }

    /// GLM: refresh token, rotated in place on successful refresh.
    pub fn refresh_token(&self) -> Option<&str> {
        self.get("refreshToken")
    }

    /// Kimi/MiniMax/Z.ai/Qwen-AI: bearer JWT.
    pub fn jwt(&self) -> Option<&str> {
        self.get("jwt").or_else(|| self.get("token"))
    }

    /// MiniMax: canonical realUserID, overriding any value parsed from the JWT.
    pub fn real_user_id(&self) -> Option<&str> {
        self.get("realUserID")
    }

    /// Qwen domestic: `tongyi_sso_ticket` cookie value.
    pub fn tongyi_sso_ticket(&self) -> Option<&str> {
        self.get("tongyi_sso_ticket")
    }

    /// Qwen-AI: paired cookies sent verbatim alongside the bearer JWT.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}
