use serde::Serialize;

/// Structured trace events emitted across the agent runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnStarted {
        room_id: String,
        sender: String,
        round_cap: u32,
    },
    TurnCompleted {
        room_id: String,
        rounds_used: u32,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolDispatched {
        mcp: String,
        tool: String,
        duration_ms: u64,
        ok: bool,
    },
    CapabilityDecision {
        mcp: String,
        tool: String,
        rule_name: Option<String>,
        decision: &'static str,
    },
    ApprovalRequested {
        approval_id: String,
        mcp: String,
        tool: String,
    },
    ApprovalResolved {
        approval_id: String,
        approved: bool,
    },
    SupervisorRestart {
        kind: &'static str,
        name: String,
        restart_count: u32,
        reason: String,
    },
    GatewayEventReceived {
        gateway: String,
        kind: &'static str,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
