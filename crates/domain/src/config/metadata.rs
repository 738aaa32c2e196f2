use serde::{Deserialize, Serialize};

/// The only `apiVersion` value accepted by [`Config::validate`](super::Config::validate).
pub const API_VERSION: &str = "agent/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Selects a deterministic pipeline (`kairo`, `kumo`, `saito`, ...).
    /// Absent means the turn engine always falls through to the LLM loop.
    #[serde(default)]
    pub canonical_name: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: "agent".into(),
            description: None,
            canonical_name: None,
        }
    }
}
