use serde::{Deserialize, Serialize};

/// Resource ceilings. Zero means unlimited in every field here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub llm_calls_per_minute: u32,
    #[serde(default)]
    pub max_tokens_per_request: u32,
    #[serde(default)]
    pub max_concurrent_requests: u32,
    #[serde(default)]
    pub monthly_cost_cap_usd: f64,
    #[serde(default)]
    pub events_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm_calls_per_minute: 0,
            max_tokens_per_request: 4096,
            max_concurrent_requests: 0,
            monthly_cost_cap_usd: 0.0,
            events_per_minute: 0,
        }
    }
}
