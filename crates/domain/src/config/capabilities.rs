use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One capability rule. Rules are evaluated in declared order; the first
/// whose `mcp` and `tool` globs both match wins (first-match-wins).
///
/// `mcp`/`tool` of `"*"` match any name. `constraints` are checked only
/// for the matched rule — they never affect which rule is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub name: String,
    #[serde(rename = "mcp")]
    pub mcp_glob: String,
    #[serde(rename = "tool")]
    pub tool_glob: String,
    #[serde(default)]
    pub allow: bool,
    #[serde(default)]
    pub require_approval: bool,
    /// Extra constraints checked against the tool-call arguments. The key
    /// `url_prefix` is distinguished (see `sa_policy`); any other key is
    /// compared against `args[key]` for string equality.
    #[serde(default)]
    pub constraints: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub rules: Vec<CapabilityRule>,
}
