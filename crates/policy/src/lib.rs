//! `sa-policy` — the capability policy engine.
//!
//! Given a `(mcp, tool, args)` triple, decide whether the call is allowed,
//! requires human approval, or is denied — first-match-wins over the
//! active config's ordered `capabilities.rules` list.

use sa_domain::config::{CapabilityRule, Config};
use serde_json::Value;

/// The pseudo-mcp name attributed to built-in tools so the policy gate can
/// evaluate them with the same rule set as MCP tools.
pub const BUILTIN_MCP: &str = "builtin";

/// Distinguished constraint key: requires `args.url` to start with the
/// configured value (a string prefix, not a glob).
const URL_PREFIX_KEY: &str = "url_prefix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RequireApproval,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::RequireApproval => "require_approval",
            Decision::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyResult {
    pub decision: Decision,
    pub matched_rule: String,
    pub violation: Option<String>,
}

impl PolicyResult {
    fn allow(rule: &str) -> Self {
        Self {
            decision: Decision::Allow,
            matched_rule: rule.into(),
            violation: None,
        }
    }

    fn require_approval(rule: &str) -> Self {
        Self {
            decision: Decision::RequireApproval,
            matched_rule: rule.into(),
            violation: None,
        }
    }

    fn deny(rule: &str, violation: impl Into<Option<String>>) -> Self {
        Self {
            decision: Decision::Deny,
            matched_rule: rule.into(),
            violation: violation.into(),
        }
    }
}

/// Wildcard-aware glob match: `"*"` matches anything, otherwise exact string
/// equality (the spec defines no partial-glob syntax beyond the wildcard).
fn glob_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

fn rule_matches(rule: &CapabilityRule, mcp: &str, tool: &str) -> bool {
    glob_matches(&rule.mcp_glob, mcp) && glob_matches(&rule.tool_glob, tool)
}

/// Evaluate a single rule's constraints against the call arguments.
/// Returns `Some(diagnostic)` on violation, `None` when satisfied.
fn check_constraints(rule: &CapabilityRule, args: &Value) -> Option<String> {
    for (key, expected) in &rule.constraints {
        if key == URL_PREFIX_KEY {
            let url = args.get("url").and_then(Value::as_str);
            match url {
                Some(url) if url.starts_with(expected.as_str()) => {}
                Some(url) => {
                    return Some(format!(
                        "constraint url_prefix: expected url to start with \"{expected}\", got \"{url}\""
                    ));
                }
                None => {
                    return Some(
                        "constraint url_prefix: args.url is missing or not a string".into(),
                    );
                }
            }
            continue;
        }

        let actual = args.get(key).map(format_value);
        match actual {
            Some(actual) if &actual == expected => {}
            Some(actual) => {
                return Some(format!(
                    "constraint {key}: expected \"{expected}\", got \"{actual}\""
                ));
            }
            None => {
                return Some(format!("constraint {key}: args.{key} is missing"));
            }
        }
    }
    None
}

/// Format an arbitrary JSON value as the string used for constraint
/// equality comparisons (strings are unquoted, everything else uses its
/// JSON representation).
fn format_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate policy for a `(mcp, tool, args)` call against the active config.
/// `config = None` (no config loaded yet) always denies with rule
/// `<no config>`.
pub fn evaluate(config: Option<&Config>, mcp: &str, tool: &str, args: &Value) -> PolicyResult {
    let Some(config) = config else {
        return PolicyResult::deny("<no config>", None);
    };

    for rule in &config.capabilities.rules {
        if !rule_matches(rule, mcp, tool) {
            continue;
        }

        if let Some(violation) = check_constraints(rule, args) {
            return PolicyResult::deny(&rule.name, format!("policy denied: {violation}"));
        }

        if !rule.allow {
            return PolicyResult::deny(&rule.name, "policy denied: rule disallows this call");
        }

        if rule.require_approval {
            return PolicyResult::require_approval(&rule.name);
        }

        return PolicyResult::allow(&rule.name);
    }

    PolicyResult::deny("<default>", None)
}

/// Whether `sender_mxid` is permitted to address this agent.
pub fn is_sender_allowed(config: &Config, sender_mxid: &str) -> bool {
    config.trust.is_sender_allowed(sender_mxid)
}

/// Whether `room_id` is a room this agent is permitted to act in.
pub fn is_room_allowed(config: &Config, room_id: &str) -> bool {
    config.trust.is_room_allowed(room_id)
}

/// Whether any outbound messaging target is configured. Used to decide
/// whether `matrix.send_message` should even be offered to the LLM — a
/// tool that would always deny is worse than no tool at all.
pub fn is_messaging_configured(config: &Config) -> bool {
    !config.messaging.targets.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::{ApprovalsConfig, CapabilitiesConfig, LimitsConfig, Metadata, ServerConfig};
    use std::collections::HashMap;

    fn cfg_with_rules(rules: Vec<CapabilityRule>) -> Config {
        Config {
            api_version: sa_domain::config::API_VERSION.into(),
            metadata: Metadata::default(),
            server: ServerConfig::default(),
            trust: Default::default(),
            limits: LimitsConfig::default(),
            capabilities: CapabilitiesConfig { rules },
            approvals: ApprovalsConfig::default(),
            llm: Default::default(),
            persona: None,
            mcp: Default::default(),
            gateways: Default::default(),
            secrets: Default::default(),
            messaging: Default::default(),
            instructions: Default::default(),
        }
    }

    fn rule(name: &str, mcp: &str, tool: &str, allow: bool, require_approval: bool) -> CapabilityRule {
        CapabilityRule {
            name: name.into(),
            mcp_glob: mcp.into(),
            tool_glob: tool.into(),
            allow,
            require_approval,
            constraints: HashMap::new(),
        }
    }

    #[test]
    fn no_config_denies_with_no_config_rule() {
        let result = evaluate(None, "browser", "fetch", &Value::Null);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.matched_rule, "<no config>");
    }

    #[test]
    fn no_matching_rule_denies_with_default() {
        let cfg = cfg_with_rules(vec![rule("r1", "browser", "fetch", true, false)]);
        let result = evaluate(Some(&cfg), "k8s", "apply", &Value::Null);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.matched_rule, "<default>");
    }

    #[test]
    fn first_match_wins() {
        let cfg = cfg_with_rules(vec![
            rule("deny-all", "*", "*", false, false),
            rule("allow-browser", "browser", "fetch", true, false),
        ]);
        let result = evaluate(Some(&cfg), "browser", "fetch", &Value::Null);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.matched_rule, "deny-all");
    }

    #[test]
    fn url_prefix_violation_denies() {
        let mut r = rule("allow-browser", "browser", "fetch", true, false);
        r.constraints.insert("url_prefix".into(), "https://example.com".into());
        let cfg = cfg_with_rules(vec![r]);
        let args = serde_json::json!({"url": "https://evil.com/x"});
        let result = evaluate(Some(&cfg), "browser", "fetch", &args);
        assert_eq!(result.decision, Decision::Deny);
        assert!(result.violation.unwrap().starts_with("policy denied"));
    }

    #[test]
    fn url_prefix_satisfied_allows() {
        let mut r = rule("allow-browser", "browser", "fetch", true, false);
        r.constraints.insert("url_prefix".into(), "https://example.com".into());
        let cfg = cfg_with_rules(vec![r]);
        let args = serde_json::json!({"url": "https://example.com/page"});
        let result = evaluate(Some(&cfg), "browser", "fetch", &args);
        assert_eq!(result.decision, Decision::Allow);
    }

    #[test]
    fn require_approval_rule() {
        let cfg = cfg_with_rules(vec![rule("apply", "k8s", "apply", true, true)]);
        let result = evaluate(Some(&cfg), "k8s", "apply", &Value::Null);
        assert_eq!(result.decision, Decision::RequireApproval);
        assert_eq!(result.matched_rule, "apply");
    }

    #[test]
    fn builtin_dispatch_uses_pseudo_mcp() {
        let cfg = cfg_with_rules(vec![rule("send", BUILTIN_MCP, "matrix.send_message", true, false)]);
        let result = evaluate(Some(&cfg), BUILTIN_MCP, "matrix.send_message", &Value::Null);
        assert_eq!(result.decision, Decision::Allow);
    }

    #[test]
    fn generic_constraint_equality() {
        let mut r = rule("apply", "k8s", "apply", true, false);
        r.constraints.insert("namespace".into(), "default".into());
        let cfg = cfg_with_rules(vec![r]);
        let ok = evaluate(Some(&cfg), "k8s", "apply", &serde_json::json!({"namespace": "default"}));
        assert_eq!(ok.decision, Decision::Allow);
        let bad = evaluate(Some(&cfg), "k8s", "apply", &serde_json::json!({"namespace": "prod"}));
        assert_eq!(bad.decision, Decision::Deny);
    }
}
