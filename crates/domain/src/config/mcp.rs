//! MCP (Model Context Protocol) server specs for the domain layer.
//!
//! These are lightweight config structs used to deserialize the `mcps`
//! section of the agent config. The client/supervisor logic lives in the
//! `sa-mcp-client` and `sa-supervisor` crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level MCP configuration: the set of tool-server subprocess specs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Configuration for a single MCP tool-server subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier for this server (used in tool naming: `name__tool`).
    /// Unique across `mcps` ∪ `gateways`.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auto_restart: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_server_config() {
        let raw = r#"{
            "name": "filesystem",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
        }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.name, "filesystem");
        assert_eq!(cfg.command, "npx");
        assert_eq!(cfg.args.len(), 3);
        assert!(!cfg.auto_restart);
    }

    #[test]
    fn deserialize_with_env_and_restart() {
        let raw = r#"{
            "name": "finnhub",
            "command": "node",
            "args": ["server.js"],
            "env": { "FINNHUB_TOKEN": "abc" },
            "auto_restart": true
        }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.env.get("FINNHUB_TOKEN").unwrap(), "abc");
        assert!(cfg.auto_restart);
    }
}
