use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default = "d_ttl")]
    pub ttl_seconds: u64,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            room: None,
            approvers: Vec::new(),
            ttl_seconds: d_ttl(),
        }
    }
}

fn d_ttl() -> u64 {
    3600
}
