//! The turn engine (§4.10): two entrypoints — an inbound chat message and
//! an inbound gateway event — sharing one LLM tool-call loop. Canonical
//! identities (`turn::canonical`) get first refusal on both entrypoints;
//! only when they decline does either fall through to the LLM.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use sa_domain::tool::{ChatRequest, ContentPart, Message, MessageContent, Role, ToolDefinition};
use sa_domain::trace::TraceEvent;
use sa_domain::{Error, Result};
use sa_store::models::{NewTurn, TurnResult, TurnTrigger};
use sa_supervisor::mcp::McpSupervisor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::parse_decision;
use crate::chat::InboundMessage;
use crate::prompt::build_system_prompt;
use crate::secret_cache::SecretCache;
use crate::state::AppState;
use crate::tools::BuiltinContext;

use super::canonical;

const ROUND_CAP: u32 = 10;

/// The normalized body of an inbound gateway event — whatever the gateway
/// producer chose to put in the event. `data` is never forwarded verbatim
/// to chat; only the text the LLM (or a canonical pipeline) produces is.
#[derive(Debug, Clone, Default)]
pub struct GatewayEventPayload {
    pub message: Option<String>,
    pub data: Option<Value>,
}

fn mint_trace_id() -> String {
    format!("t_{}", Uuid::new_v4().simple())
}

/// Matrix entrypoint. Approval decisions are intercepted before anything
/// else — they never mint a turn row or touch the LLM loop.
pub async fn handle_matrix_message(state: &Arc<AppState>, msg: InboundMessage) -> Result<()> {
    if let Some(decision) = parse_decision(&msg.text) {
        return handle_approval_decision(state, &msg, decision).await;
    }

    let Some(config) = state.config() else {
        tracing::warn!("dropping matrix message: no active config");
        return Ok(());
    };

    if !sa_policy::is_room_allowed(&config, &msg.room_id) {
        tracing::warn!(room_id = %msg.room_id, "matrix message from disallowed room ignored");
        return Ok(());
    }
    if !sa_policy::is_sender_allowed(&config, &msg.sender) {
        tracing::warn!(sender = %msg.sender, "matrix message from disallowed sender ignored");
        return Ok(());
    }

    let trace_id = mint_trace_id();
    let turn_id = state
        .store
        .insert_turn(NewTurn {
            trace_id: trace_id.clone(),
            room_id: msg.room_id.clone(),
            sender_mxid: msg.sender.clone(),
            message: msg.text.clone(),
            trigger: TurnTrigger::Matrix,
            gateway_name: None,
            event_type: None,
        })
        .await
        .map_err(Error::from)?;

    let cancel = state.register_turn(&trace_id).await;

    TraceEvent::TurnStarted {
        room_id: msg.room_id.clone(),
        sender: msg.sender.clone(),
        round_cap: ROUND_CAP,
    }
    .emit();
    let started = std::time::Instant::now();

    let canonical_name = config.metadata.canonical_name.clone();
    let canonical_result = canonical::try_handle_matrix(state, canonical_name.as_deref(), &msg.sender, &msg.text, &trace_id).await;

    let (turn_result, tool_calls, error_msg) = match canonical_result {
        Some(Ok(())) => (TurnResult::Success, 0, None),
        Some(Err(e)) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "canonical pipeline failed");
            (TurnResult::Error, 0, Some(e.to_string()))
        }
        None => {
            run_llm_loop(state, &config, &cancel, &msg.room_id, Some(&msg.event_id), None, &msg.sender, &msg.text, &trace_id).await
        }
    };

    state.finish_turn(&trace_id).await;
    TraceEvent::TurnCompleted {
        room_id: msg.room_id.clone(),
        rounds_used: tool_calls.min(u32::MAX as i64) as u32,
        duration_ms: started.elapsed().as_millis() as u64,
    }
    .emit();

    state
        .store
        .finalize_turn(turn_id, tool_calls, turn_result, error_msg)
        .await
        .map_err(Error::from)?;

    Ok(())
}

async fn handle_approval_decision(state: &Arc<AppState>, msg: &InboundMessage, decision: crate::approval::Decision) -> Result<()> {
    let Some(config) = state.config() else {
        return Ok(());
    };

    if !config.approvals.approvers.iter().any(|a| a == &msg.sender) {
        state
            .chat
            .send_reply(&msg.room_id, &msg.event_id, "you are not an approver for this agent")
            .await
            .ok();
        return Ok(());
    }

    let status = if decision.approved {
        sa_store::models::ApprovalStatus::Approved
    } else {
        sa_store::models::ApprovalStatus::Denied
    };
    let reason = if decision.reason.is_empty() { None } else { Some(decision.reason) };

    state
        .store
        .set_approval_status(&decision.approval_id, status, Some(msg.sender.clone()), reason)
        .await
        .map_err(Error::from)?;

    let ack = if decision.approved {
        format!("✅ {} approved", decision.approval_id)
    } else {
        format!("❌ {} denied", decision.approval_id)
    };
    state.chat.send_reply(&msg.room_id, &msg.event_id, &ack).await.ok();
    Ok(())
}

/// Event entrypoint. A gateway event is normalized to a single user message
/// (the event's `message`, or else "Event received from <source> (type:
/// <type>)." plus any `payload.data`) and handed to the canonical pipeline
/// or LLM loop. The reply actually posted to the admin room is prefixed with
/// a `⚡ Event: <source>/<type>` breadcrumb at send time — never folded into
/// the text the model sees. Raw `payload.data` never reaches chat directly.
pub async fn handle_gateway_event(state: &Arc<AppState>, source: &str, event_type: &str, payload: GatewayEventPayload) -> Result<()> {
    let Some(config) = state.config() else {
        tracing::warn!("dropping gateway event: no active config");
        return Ok(());
    };

    TraceEvent::GatewayEventReceived {
        gateway: source.to_string(),
        kind: "event",
    }
    .emit();

    let Some(admin_room) = config.trust.admin_room.clone() else {
        tracing::warn!(source = %source, event_type = %event_type, "dropping gateway event: no admin room configured");
        return Ok(());
    };

    let trace_id = mint_trace_id();
    let user_text = match payload.message.clone().filter(|m| !m.is_empty()) {
        Some(message) => message,
        None => {
            let mut text = format!("Event received from {source} (type: {event_type}).");
            if let Some(data) = &payload.data {
                text.push(' ');
                text.push_str(&data.to_string());
            }
            text
        }
    };

    let turn_id = state
        .store
        .insert_turn(NewTurn {
            trace_id: trace_id.clone(),
            room_id: admin_room.clone(),
            sender_mxid: format!("gateway:{source}"),
            message: user_text.clone(),
            trigger: TurnTrigger::Gateway,
            gateway_name: Some(source.to_string()),
            event_type: Some(event_type.to_string()),
        })
        .await
        .map_err(Error::from)?;

    let cancel = state.register_turn(&trace_id).await;
    let started = std::time::Instant::now();

    let canonical_name = config.metadata.canonical_name.clone();
    let canonical_result = canonical::try_handle_gateway(state, canonical_name.as_deref(), event_type, &trace_id).await;

    let (turn_result, tool_calls, error_msg) = match canonical_result {
        Some(Ok(())) => (TurnResult::Success, 0, None),
        Some(Err(e)) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "canonical pipeline failed for gateway event");
            (TurnResult::Error, 0, Some(e.to_string()))
        }
        None => {
            let breadcrumb = format!("⚡ Event: {source}/{event_type}");
            let (result, calls, err) = run_llm_loop(
                state,
                &config,
                &cancel,
                &admin_room,
                None,
                Some(&breadcrumb),
                &format!("gateway:{source}"),
                &user_text,
                &trace_id,
            )
            .await;
            (result, calls, err)
        }
    };

    state.finish_turn(&trace_id).await;
    TraceEvent::TurnCompleted {
        room_id: admin_room,
        rounds_used: tool_calls.min(u32::MAX as i64) as u32,
        duration_ms: started.elapsed().as_millis() as u64,
    }
    .emit();

    state
        .store
        .finalize_turn(turn_id, tool_calls, turn_result, error_msg)
        .await
        .map_err(Error::from)?;

    Ok(())
}

/// The shared LLM tool-call loop. Sends the final reply (threaded, when
/// `reply_to_event` is given) and returns `(result, tool_call_count, error)`.
/// `reply_prefix`, when given, is prepended to every outgoing chat send —
/// never to the text handed to the LLM — so the gateway-event entrypoint
/// can stamp its `⚡ Event: <source>/<type>` breadcrumb onto the reply
/// without polluting the model's input (§4.10).
#[allow(clippy::too_many_arguments)]
async fn run_llm_loop(
    state: &Arc<AppState>,
    config: &sa_domain::config::Config,
    cancel: &CancellationToken,
    room_id: &str,
    reply_to_event: Option<&str>,
    reply_prefix: Option<&str>,
    sender: &str,
    user_text: &str,
    trace_id: &str,
) -> (TurnResult, i64, Option<String>) {
    let Some(provider) = state.active_provider() else {
        let msg = "no LLM provider configured".to_string();
        send_reply(state, room_id, reply_to_event, reply_prefix, &format!("⚠️ {msg}")).await;
        return (TurnResult::Error, 0, Some(msg));
    };

    let Some(persona) = config.persona.clone() else {
        let msg = "no persona configured".to_string();
        send_reply(state, room_id, reply_to_event, reply_prefix, &format!("⚠️ {msg}")).await;
        return (TurnResult::Error, 0, Some(msg));
    };

    let system_prompt = build_system_prompt(config, &config.messaging.targets, "");
    let tool_defs = match gather_tool_definitions(state, config).await {
        Ok(defs) => defs,
        Err(e) => {
            let msg = format!("failed to gather tool definitions: {e}");
            send_reply(state, room_id, reply_to_event, reply_prefix, &format!("⚠️ {msg}")).await;
            return (TurnResult::Error, 0, Some(msg));
        }
    };

    let mut history = vec![Message::system(system_prompt), Message::user(user_text.to_string())];
    let mut tool_calls_made: i64 = 0;

    for round in 0..ROUND_CAP {
        if cancel.is_cancelled() {
            let msg = "turn cancelled".to_string();
            return (TurnResult::Error, tool_calls_made, Some(msg));
        }

        let request = ChatRequest {
            model: persona.model_id.clone(),
            messages: history.clone(),
            tools: tool_defs.clone(),
            temperature: Some(persona.temperature),
            max_tokens: if config.limits.max_tokens_per_request == 0 {
                None
            } else {
                Some(config.limits.max_tokens_per_request)
            },
        };

        let llm_started = std::time::Instant::now();
        let response = match provider.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                let msg = format!("LLM request failed: {e}");
                send_reply(state, room_id, reply_to_event, reply_prefix, &format!("⚠️ {msg}")).await;
                return (TurnResult::Error, tool_calls_made, Some(msg));
            }
        };

        TraceEvent::LlmRequest {
            provider: provider.provider_id().to_string(),
            model: response.model.clone(),
            duration_ms: llm_started.elapsed().as_millis() as u64,
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        }
        .emit();

        if response.finish_reason.as_deref() != Some("tool_calls") || response.tool_calls.is_empty() {
            send_reply(state, room_id, reply_to_event, reply_prefix, &response.content).await;
            return (TurnResult::Success, tool_calls_made, None);
        }

        let mut assistant_parts = Vec::new();
        if !response.content.is_empty() {
            assistant_parts.push(ContentPart::Text { text: response.content.clone() });
        }
        for call in &response.tool_calls {
            assistant_parts.push(ContentPart::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }
        history.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(assistant_parts),
        });

        for call in &response.tool_calls {
            tool_calls_made += 1;
            let outcome = match dispatch_tool_call(state, config, cancel, sender, trace_id, &call.tool_name, call.arguments.clone()).await {
                Ok(text) => (text, false),
                Err(e) => (format!("error: {e}"), true),
            };
            history.push(Message {
                role: Role::Tool,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_use_id: call.call_id.clone(),
                    content: outcome.0,
                    is_error: outcome.1,
                }]),
            });
        }

        if round == ROUND_CAP - 1 {
            let msg = format!("tool-call round cap ({ROUND_CAP}) reached");
            send_reply(state, room_id, reply_to_event, reply_prefix, &format!("⚠️ {msg}")).await;
            return (TurnResult::Error, tool_calls_made, Some(msg));
        }
    }

    (TurnResult::Error, tool_calls_made, Some("turn loop exited without a final reply".into()))
}

async fn send_reply(state: &Arc<AppState>, room_id: &str, reply_to_event: Option<&str>, reply_prefix: Option<&str>, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    let text = match reply_prefix {
        Some(prefix) => format!("{prefix}\n{text}"),
        None => text.to_string(),
    };
    let result = match reply_to_event {
        Some(event_id) => state.chat.send_reply(room_id, event_id, &text).await,
        None => state.chat.send_text(room_id, &text).await,
    };
    if let Err(e) = result {
        tracing::warn!(room_id = %room_id, error = %e, "failed to send turn reply");
    }
}

async fn gather_tool_definitions(state: &Arc<AppState>, config: &sa_domain::config::Config) -> Result<Vec<ToolDefinition>> {
    let mut defs = Vec::new();
    for mcp_name in state.running_mcp_names().await {
        let tools = state.mcp_supervisor.list_tools(&mcp_name).await?;
        for tool in tools {
            defs.push(ToolDefinition {
                name: format!("{mcp_name}__{}", tool.name),
                description: tool.description,
                parameters: tool.input_schema,
            });
        }
    }
    defs.extend(state.tool_registry.visible_definitions(sa_policy::is_messaging_configured(config)));
    Ok(defs)
}

/// Dispatch a single tool call through the policy gate and (if required)
/// the approval gate, mirroring built-in and MCP tools through the same
/// path — built-ins are attributed to the pseudo-mcp `sa_policy::BUILTIN_MCP`.
async fn dispatch_tool_call(
    state: &Arc<AppState>,
    config: &sa_domain::config::Config,
    cancel: &CancellationToken,
    sender: &str,
    trace_id: &str,
    tool_name: &str,
    mut args: Value,
) -> Result<String> {
    let (mcp, tool) = if let Some(builtin) = state.tool_registry.get(tool_name) {
        (sa_policy::BUILTIN_MCP.to_string(), builtin.name().to_string())
    } else {
        split_mcp_tool(tool_name)?
    };

    let policy = sa_policy::evaluate(Some(config), &mcp, &tool, &args);
    TraceEvent::CapabilityDecision {
        mcp: mcp.clone(),
        tool: tool.clone(),
        rule_name: Some(policy.matched_rule.clone()),
        decision: policy.decision.as_str(),
    }
    .emit();

    match policy.decision {
        sa_policy::Decision::Deny => {
            let reason = policy
                .violation
                .clone()
                .unwrap_or_else(|| format!("policy denied: no capability rule allows {mcp}/{tool} (matched: {})", policy.matched_rule));
            return Err(Error::Other(reason));
        }
        sa_policy::Decision::RequireApproval => {
            let admin_room = config
                .approvals
                .room
                .clone()
                .or_else(|| config.trust.admin_room.clone())
                .ok_or_else(|| Error::Other("approval required but no approvals.room or trust.admin_room configured".into()))?;
            state
                .approval_gate
                .request(&admin_room, sender, &mcp, &tool, &args, trace_id, config.approvals.ttl_seconds, cancel)
                .await?;
        }
        sa_policy::Decision::Allow => {}
    }

    resolve_secret_placeholders(&mut args, &state.secret_cache)?;

    let tool_started = std::time::Instant::now();
    let result = if mcp == sa_policy::BUILTIN_MCP {
        execute_builtin(state, config, trace_id, &tool, args).await
    } else {
        execute_mcp(&state.mcp_supervisor, &mcp, &tool, args).await
    };

    TraceEvent::ToolDispatched {
        mcp,
        tool,
        duration_ms: tool_started.elapsed().as_millis() as u64,
        ok: result.is_ok(),
    }
    .emit();

    result
}

fn split_mcp_tool(tool_name: &str) -> Result<(String, String)> {
    tool_name
        .split_once("__")
        .map(|(mcp, tool)| (mcp.to_string(), tool.to_string()))
        .ok_or_else(|| Error::Other(format!("malformed tool name \"{tool_name}\", expected \"<mcp>__<tool>\"")))
}

async fn execute_builtin(state: &Arc<AppState>, config: &sa_domain::config::Config, trace_id: &str, tool: &str, args: Value) -> Result<String> {
    let builtin = state
        .tool_registry
        .get(tool)
        .ok_or_else(|| Error::Other(format!("unknown built-in tool \"{tool}\"")))?;
    let rate_limiter = state.rate_limiter.lock().await.clone();
    let ctx = BuiltinContext {
        config: config.clone(),
        chat: state.chat.clone(),
        outbound_counter: state.outbound_counter.clone(),
        rate_limiter,
        agent_id: state.agent_id.clone(),
        trace_id: trace_id.to_string(),
    };
    let result = builtin.execute(&ctx, args).await;
    if result.is_error {
        Err(Error::Other(result.text))
    } else {
        Ok(result.text)
    }
}

async fn execute_mcp(supervisor: &McpSupervisor, mcp: &str, tool: &str, args: Value) -> Result<String> {
    let result = supervisor.call_tool(mcp, tool, args).await?;
    let text = result
        .content
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if result.is_error {
        Err(Error::Other(text))
    } else {
        Ok(text)
    }
}

/// Replace every `{{secret:<name>}}` placeholder found in string leaves of
/// `value` with the cached secret's current value. A missing or expired
/// reference fails the whole call rather than forwarding the placeholder.
fn resolve_secret_placeholders(value: &mut Value, cache: &SecretCache) -> Result<()> {
    let re = Regex::new(r"\{\{secret:([A-Za-z0-9_.-]+)\}\}").expect("static regex");
    resolve_value(value, &re, cache)
}

fn resolve_value(value: &mut Value, re: &Regex, cache: &SecretCache) -> Result<()> {
    match value {
        Value::String(s) => {
            if let Some(caps) = re.captures(s) {
                let name = caps.get(1).unwrap().as_str();
                let resolved = cache
                    .get_string(name)
                    .map_err(|_| Error::Other(format!("secret \"{name}\" not available for placeholder resolution")))?;
                *s = re.replace(s, resolved.as_str()).into_owned();
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                resolve_value(item, re, cache)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_value(v, re, cache)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_mcp_tool_splits_on_double_underscore() {
        let (mcp, tool) = split_mcp_tool("finnhub__quote").unwrap();
        assert_eq!(mcp, "finnhub");
        assert_eq!(tool, "quote");
    }

    #[test]
    fn split_mcp_tool_rejects_missing_separator() {
        assert!(split_mcp_tool("quote").is_err());
    }

    #[test]
    fn resolve_secret_placeholders_replaces_known_secret() {
        let cache = SecretCache::new();
        cache.set("finnhub", b"abc123".to_vec(), 3600);
        let mut args = serde_json::json!({"token": "{{secret:finnhub}}", "symbol": "AAPL"});
        resolve_secret_placeholders(&mut args, &cache).unwrap();
        assert_eq!(args["token"], "abc123");
        assert_eq!(args["symbol"], "AAPL");
    }

    #[test]
    fn resolve_secret_placeholders_errors_on_missing_secret() {
        let cache = SecretCache::new();
        let mut args = serde_json::json!({"token": "{{secret:missing}}"});
        assert!(resolve_secret_placeholders(&mut args, &cache).is_err());
    }

    #[test]
    fn resolve_secret_placeholders_recurses_into_nested_objects() {
        let cache = SecretCache::new();
        cache.set("brave", b"xyz".to_vec(), 3600);
        let mut args = serde_json::json!({"headers": {"authorization": "{{secret:brave}}"}});
        resolve_secret_placeholders(&mut args, &cache).unwrap();
        assert_eq!(args["headers"]["authorization"], "xyz");
    }
}
