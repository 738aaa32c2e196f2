use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A gateway is either a built-in trigger source (`cron`, `webhook`) or an
/// external subprocess speaking the same stdio protocol as an MCP server.
/// Exactly one of `kind`/`command` must be set; `Config::validate` enforces
/// the XOR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// Unique identifier for this gateway. Unique across `mcps` ∪ `gateways`.
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BuiltinGatewayKind>,
    #[serde(default)]
    pub builtin_config: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub auto_restart: bool,
}

impl GatewaySpec {
    pub fn is_builtin(&self) -> bool {
        self.kind.is_some()
    }

    pub fn is_external(&self) -> bool {
        self.command.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinGatewayKind {
    Cron,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub gateways: Vec<GatewaySpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_cron_gateway() {
        let raw = r#"{"name":"saito","type":"cron"}"#;
        let spec: GatewaySpec = serde_json::from_str(raw).unwrap();
        assert!(spec.is_builtin());
        assert!(!spec.is_external());
        assert_eq!(spec.kind, Some(BuiltinGatewayKind::Cron));
    }

    #[test]
    fn external_gateway() {
        let raw = r#"{"name":"slack-bridge","command":"slack-gateway","args":["--port","9000"]}"#;
        let spec: GatewaySpec = serde_json::from_str(raw).unwrap();
        assert!(spec.is_external());
        assert!(!spec.is_builtin());
    }
}
