mod approvals;
mod capabilities;
mod gateways;
mod instructions;
mod limits;
mod llm;
mod mcp;
mod messaging;
mod metadata;
mod persona;
mod secrets;
mod server;
mod trust;

pub use approvals::*;
pub use capabilities::*;
pub use gateways::*;
pub use instructions::*;
pub use limits::*;
pub use llm::*;
pub use mcp::*;
pub use messaging::*;
pub use metadata::*;
pub use persona::*;
pub use secrets::*;
pub use server::*;
pub use trust::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "d_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub persona: Option<PersonaConfig>,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub instructions: InstructionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: d_api_version(),
            metadata: Metadata::default(),
            server: ServerConfig::default(),
            trust: TrustConfig::default(),
            limits: LimitsConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            approvals: ApprovalsConfig::default(),
            llm: LlmConfig::default(),
            persona: None,
            mcp: McpConfig::default(),
            gateways: GatewaysConfig::default(),
            secrets: SecretsConfig::default(),
            messaging: MessagingConfig::default(),
            instructions: InstructionsConfig::default(),
        }
    }
}

fn d_api_version() -> String {
    API_VERSION.into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.api_version != API_VERSION {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "apiVersion".into(),
                message: format!(
                    "unsupported apiVersion \"{}\" (expected \"{API_VERSION}\")",
                    self.api_version
                ),
            });
        }

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        // ── LLM providers ────────────────────────────────────────────
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }
        let mut seen_provider_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            } else if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_provider_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }
            if provider.auth.mode == AuthMode::ApiKey
                && provider.auth.env.as_ref().is_none_or(|v| v.is_empty())
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].auth"),
                    message: format!(
                        "provider \"{}\" uses api_key auth mode but has no auth.env configured",
                        provider.id
                    ),
                });
            }
        }

        // ── Persona ──────────────────────────────────────────────────
        if let Some(persona) = &self.persona {
            if persona.system_prompt.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "persona.system_prompt".into(),
                    message: "system_prompt must not be empty".into(),
                });
            }
            if !self.llm.providers.iter().any(|p| p.id == persona.provider_id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "persona.provider_id".into(),
                    message: format!(
                        "persona references unknown provider id \"{}\"",
                        persona.provider_id
                    ),
                });
            }
        } else {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "persona".into(),
                message: "no persona configured — the agent has no system prompt or pinned model"
                    .into(),
            });
        }

        // ── MCP servers + gateways: shared name uniqueness ──────────
        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, server) in self.mcp.servers.iter().enumerate() {
            if server.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].name"),
                    message: "server name must not be empty".into(),
                });
            }
            if server.command.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].command"),
                    message: "command must not be empty".into(),
                });
            }
            if !server.name.is_empty() && !seen_names.insert(&server.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].name"),
                    message: format!("duplicate name \"{}\" across mcps/gateways", server.name),
                });
            }
            for key in server.env.keys() {
                if matches!(
                    key.as_str(),
                    "LD_PRELOAD" | "LD_LIBRARY_PATH" | "DYLD_INSERT_LIBRARIES"
                ) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("mcp.servers[{i}].env.{key}"),
                        message: format!("overriding {key} is not permitted for security"),
                    });
                }
            }
        }

        for (i, gw) in self.gateways.gateways.iter().enumerate() {
            if gw.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("gateways[{i}].name"),
                    message: "gateway name must not be empty".into(),
                });
            }
            if !gw.name.is_empty() && !seen_names.insert(&gw.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("gateways[{i}].name"),
                    message: format!("duplicate name \"{}\" across mcps/gateways", gw.name),
                });
            }
            match (gw.is_builtin(), gw.is_external()) {
                (true, true) => errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("gateways[{i}]"),
                    message: "gateway must specify exactly one of `type` or `command`, not both"
                        .into(),
                }),
                (false, false) => errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("gateways[{i}]"),
                    message: "gateway must specify one of `type` or `command`".into(),
                }),
                _ => {}
            }
        }

        // ── Messaging alias uniqueness ───────────────────────────────
        if self.messaging.has_duplicate_alias() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "messaging.targets".into(),
                message: "duplicate messaging target alias".into(),
            });
        }

        // ── Approvals ────────────────────────────────────────────────
        if self.approvals.enabled && self.approvals.approvers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "approvals.approvers".into(),
                message: "approvals are enabled but no approvers are configured".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "openai".into(),
                    kind: ProviderKind::OpenaiCompat,
                    base_url: "https://api.openai.com/v1".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("OPENAI_API_KEY".into()),
                    },
                }],
                ..LlmConfig::default()
            },
            persona: Some(PersonaConfig {
                system_prompt: "You are a helpful agent.".into(),
                provider_id: "openai".into(),
                model_id: "gpt-4o".into(),
                temperature: 0.7,
                api_key_secret_ref: None,
            }),
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn wrong_api_version_is_error() {
        let mut cfg = valid_config();
        cfg.api_version = "agent/v0".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "apiVersion").expect("expected apiVersion error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.port").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let mut second = cfg.llm.providers[0].clone();
        second.auth.env = Some("OPENAI_API_KEY_2".into());
        cfg.llm.providers.push(second);
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|e| e.message.contains("duplicate provider id"))
            .expect("expected duplicate provider warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn persona_unknown_provider_is_error() {
        let mut cfg = valid_config();
        cfg.persona.as_mut().unwrap().provider_id = "missing".into();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "persona.provider_id").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn missing_persona_is_warning() {
        let mut cfg = valid_config();
        cfg.persona = None;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "persona").unwrap().severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn duplicate_name_across_mcp_and_gateway_is_error() {
        let mut cfg = valid_config();
        cfg.mcp.servers.push(McpServerConfig {
            name: "shared".into(),
            command: "node".into(),
            args: vec![],
            env: Default::default(),
            auto_restart: false,
        });
        cfg.gateways.gateways.push(GatewaySpec {
            name: "shared".into(),
            kind: Some(BuiltinGatewayKind::Cron),
            builtin_config: serde_json::Value::Null,
            command: None,
            args: vec![],
            env: Default::default(),
            config: serde_json::Value::Null,
            auto_restart: false,
        });
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.message.contains("duplicate name \"shared\"")));
    }

    #[test]
    fn gateway_missing_type_and_command_is_error() {
        let mut cfg = valid_config();
        cfg.gateways.gateways.push(GatewaySpec {
            name: "broken".into(),
            kind: None,
            builtin_config: serde_json::Value::Null,
            command: None,
            args: vec![],
            env: Default::default(),
            config: serde_json::Value::Null,
            auto_restart: false,
        });
        let issues = cfg.validate();
        let issue = find_issue(&issues, "gateways[0]").expect("expected gateway XOR error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn gateway_with_both_type_and_command_is_error() {
        let mut cfg = valid_config();
        cfg.gateways.gateways.push(GatewaySpec {
            name: "broken".into(),
            kind: Some(BuiltinGatewayKind::Webhook),
            builtin_config: serde_json::Value::Null,
            command: Some("node".into()),
            args: vec![],
            env: Default::default(),
            config: serde_json::Value::Null,
            auto_restart: false,
        });
        let issues = cfg.validate();
        let issue = find_issue(&issues, "gateways[0]").expect("expected gateway XOR error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn duplicate_messaging_alias_is_error() {
        let mut cfg = valid_config();
        cfg.messaging.targets = vec![
            MessagingTarget {
                alias: "kumo".into(),
                room_id: "!a:example.com".into(),
            },
            MessagingTarget {
                alias: "kumo".into(),
                room_id: "!b:example.com".into(),
            },
        ];
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "messaging.targets").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn approvals_enabled_without_approvers_is_warning() {
        let mut cfg = valid_config();
        cfg.approvals.enabled = true;
        cfg.approvals.approvers.clear();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "approvals.approvers").unwrap().severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
