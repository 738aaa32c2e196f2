use serde::{Deserialize, Serialize};

/// Declares a secret this agent needs, sourced from an environment variable
/// at startup and held only in the in-memory secret cache thereafter (never
/// persisted to the durable store, never logged).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub env_var: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
    /// Base URL of the remote token issuer `POST /secrets/token` redeems
    /// against. `None` means the legacy `/secrets/apply` path is the only
    /// way to populate the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
}
