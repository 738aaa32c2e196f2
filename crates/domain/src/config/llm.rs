use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Unlike a multi-role router, this runtime pins exactly one provider/model
// per persona (see `config::persona::PersonaConfig`). `LlmConfig` is simply
// the catalogue of provider connection details that a persona's
// `provider_id` selects into.

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Env var containing the API key, used only when no persona-level
    /// secret ref resolves one through the secret cache.
    #[serde(default)]
    pub env: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    None,
}

fn d_timeout_ms() -> u64 {
    120_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_default_has_no_providers() {
        assert!(LlmConfig::default().providers.is_empty());
    }

    #[test]
    fn provider_config_deserializes() {
        let json = r#"{
            "id": "openai",
            "kind": "openai_compat",
            "base_url": "https://api.openai.com/v1",
            "auth": { "mode": "api_key", "env": "OPENAI_API_KEY" }
        }"#;
        let p: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(p.id, "openai");
        assert_eq!(p.kind, ProviderKind::OpenaiCompat);
        assert_eq!(p.auth.env.as_deref(), Some("OPENAI_API_KEY"));
    }
}
