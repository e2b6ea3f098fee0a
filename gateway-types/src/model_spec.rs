use serde::{Deserialize, Serialize};

/// Result of resolving a public model name through the config's mapping
/// table against the provider catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub account_id: Option<String>,
    pub actual_model: String,
}

/// One entry of a provider's public -> vendor-internal model mapping table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMapping {
    pub public_name: String,
    pub vendor_name: String,
}

/// Context/output token limits for one model, as published by models.dev.
/// Used only to annotate `/v1/models` responses when known; an absent entry
/// is omitted rather than treated as an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub context_limit: u32,
    pub output_limit: u32,
    #[serde(default)]
    pub cache_read: Option<u32>,
    #[serde(default)]
    pub cache_write: Option<u32>,
}

impl ModelSpec {
    pub fn new(context_limit: u32, output_limit: u32) -> Self {
        Self {
            context_limit,
            output_limit,
            cache_read: None,
            cache_write: None,
        }
    }
}
