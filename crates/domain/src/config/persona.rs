use serde::{Deserialize, Serialize};

/// The agent's single pinned model identity. Unlike a multi-role router,
/// a persona names exactly one provider and model for every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub system_prompt: String,
    pub provider_id: String,
    pub model_id: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_secret_ref: Option<String>,
}

fn d_temperature() -> f32 {
    0.7
}
