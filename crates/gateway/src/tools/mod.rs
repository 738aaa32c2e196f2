//! Built-in tool registry (§4.7). Built-in tools implement the same
//! `{definition(), execute(ctx, args)}` capability surface as MCP tools, so
//! the turn engine and policy engine treat both uniformly — built-ins are
//! just attributed to the pseudo-mcp `builtin` (see `sa_policy::BUILTIN_MCP`).

pub mod outbound;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;
use sa_domain::config::Config;
use sa_domain::tool::ToolDefinition;

use crate::chat::ChatTransport;
use outbound::RateLimiter;

/// A built-in tool's execution result, mirroring the MCP wire shape
/// `{content:[{text}], is_error}` so both dispatch paths format identically.
#[derive(Debug, Clone)]
pub struct BuiltinResult {
    pub text: String,
    pub is_error: bool,
}

impl BuiltinResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Per-call context a built-in tool needs: a snapshot of the config active
/// when the turn started, the chat transport to send through, and the
/// shared outbound counter/rate-limiter state.
pub struct BuiltinContext {
    pub config: Config,
    pub chat: Arc<dyn ChatTransport>,
    pub outbound_counter: Arc<AtomicU64>,
    pub rate_limiter: Arc<RateLimiter>,
    pub agent_id: String,
    pub trace_id: String,
}

#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, ctx: &BuiltinContext, args: serde_json::Value) -> BuiltinResult;
}

/// The set of registered built-in tools, keyed by canonical name
/// (e.g. `matrix.send_message`). Registering the same name twice is a
/// programming error, not a runtime condition — it panics at startup
/// rather than silently shadowing.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn BuiltinTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn BuiltinTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            panic!("duplicate built-in tool registration: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinTool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions visible to the LLM. `messaging_configured` hides
    /// `matrix.send_message` when no outbound target exists — a tool that
    /// would always deny is worse than no tool at all.
    pub fn visible_definitions(&self, messaging_configured: bool) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| messaging_configured || t.name() != outbound::TOOL_NAME)
            .map(|t| t.definition())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    #[async_trait]
    impl BuiltinTool for Dummy {
        fn name(&self) -> &str {
            self.0
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.into(),
                description: "dummy".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }
        }
        async fn execute(&self, _ctx: &BuiltinContext, _args: serde_json::Value) -> BuiltinResult {
            BuiltinResult::ok("done")
        }
    }

    #[test]
    #[should_panic(expected = "duplicate built-in tool registration")]
    fn duplicate_registration_panics() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Dummy("dup")));
        registry.register(Arc::new(Dummy("dup")));
    }

    #[test]
    fn hides_outbound_tool_when_messaging_not_configured() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Dummy(outbound::TOOL_NAME)));
        assert!(registry.visible_definitions(false).is_empty());
        assert_eq!(registry.visible_definitions(true).len(), 1);
    }
}
