//! The outbound-message built-in tool (`matrix.send_message`). Despite the
//! name it addresses whatever chat fabric is wired in; `matrix` names the
//! canonical entrypoint this runtime was originally built around, per
//! `KAIRO_NEWS_REQUEST`/`KUMO_NEWS_RESPONSE` conventions elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use sa_domain::tool::ToolDefinition;

use super::{BuiltinContext, BuiltinResult, BuiltinTool};

pub const TOOL_NAME: &str = "matrix.send_message";

/// A fixed-window-per-minute limiter, guarded by a single mutex per the
/// concurrency model's "Outbound-message fixed-window rate limiter: single
/// mutex" discipline. `0` disables the limit entirely.
pub struct RateLimiter {
    max_per_minute: u32,
    state: Mutex<(u64, u32)>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            state: Mutex::new((current_window(), 0)),
        }
    }

    /// Attempt to consume one slot in the current window. Returns `true`
    /// when allowed (and the counter is incremented), `false` when the
    /// window is exhausted (counter left unchanged).
    pub fn try_acquire(&self) -> bool {
        if self.max_per_minute == 0 {
            return true;
        }
        let mut guard = self.state.lock();
        let window = current_window();
        if guard.0 != window {
            *guard = (window, 0);
        }
        if guard.1 >= self.max_per_minute {
            return false;
        }
        guard.1 += 1;
        true
    }
}

fn current_window() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / 60)
        .unwrap_or(0)
}

pub struct OutboundMessageTool;

#[async_trait]
impl BuiltinTool for OutboundMessageTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.into(),
            description: "Send an outbound chat message to a configured messaging target alias."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": {"type": "string", "description": "Messaging target alias, e.g. \"kumo\" or \"user\"."},
                    "message": {"type": "string", "description": "Message text to send."}
                },
                "required": ["target", "message"]
            }),
        }
    }

    async fn execute(&self, ctx: &BuiltinContext, args: serde_json::Value) -> BuiltinResult {
        let Some(target) = args.get("target").and_then(|v| v.as_str()) else {
            return BuiltinResult::error("missing required string argument \"target\"");
        };
        let Some(message) = args.get("message").and_then(|v| v.as_str()) else {
            return BuiltinResult::error("missing required string argument \"message\"");
        };

        let Some(room_id) = ctx.config.messaging.resolve(target) else {
            return BuiltinResult::error(format!("unknown messaging target alias \"{target}\""));
        };

        if !ctx.rate_limiter.try_acquire() {
            tracing::warn!(
                agent_id = %ctx.agent_id,
                target = %target,
                room_id = %room_id,
                status = "rate_limited",
                "outbound message rejected by rate limiter"
            );
            return BuiltinResult::error("rate limit exceeded for outbound messages");
        }

        if let Err(e) = ctx.chat.send_text(room_id, message).await {
            tracing::warn!(
                agent_id = %ctx.agent_id,
                target = %target,
                room_id = %room_id,
                status = "send_failed",
                error = %e,
                "outbound message send failed"
            );
            return BuiltinResult::error(format!("failed to send message: {e}"));
        }

        ctx.outbound_counter.fetch_add(1, Ordering::SeqCst);

        if let Some(admin_room) = ctx.config.trust.admin_room.as_deref() {
            let breadcrumb = format!("📨 Sent message to {target} (trace={})", ctx.trace_id);
            if let Err(e) = ctx.chat.send_text(admin_room, &breadcrumb).await {
                tracing::warn!(admin_room = %admin_room, error = %e, "failed to post audit breadcrumb");
            }
        }

        tracing::info!(
            agent_id = %ctx.agent_id,
            target = %target,
            room_id = %room_id,
            status = "sent",
            "outbound message sent"
        );

        BuiltinResult::ok(format!("sent to {target} ({room_id})"))
    }
}

pub fn outbound_tool() -> Arc<dyn BuiltinTool> {
    Arc::new(OutboundMessageTool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::MockTransport;
    use sa_domain::config::{Config, MessagingConfig, MessagingTarget};

    fn ctx_with(config: Config, max_per_minute: u32) -> (BuiltinContext, Arc<MockTransport>) {
        let chat = Arc::new(MockTransport::new());
        let ctx = BuiltinContext {
            config,
            chat: chat.clone(),
            outbound_counter: Arc::new(AtomicU64::new(0)),
            rate_limiter: Arc::new(RateLimiter::new(max_per_minute)),
            agent_id: "kairo".into(),
            trace_id: "t1".into(),
        };
        (ctx, chat)
    }

    fn config_with_target() -> Config {
        Config {
            messaging: MessagingConfig {
                targets: vec![MessagingTarget {
                    alias: "kumo".into(),
                    room_id: "!kumo:example.com".into(),
                }],
                max_per_minute: 0,
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn unknown_alias_errors_without_sending() {
        let (ctx, chat) = ctx_with(Config::default(), 0);
        let result = OutboundMessageTool
            .execute(&ctx, serde_json::json!({"target": "kumo", "message": "hi"}))
            .await;
        assert!(result.is_error);
        assert!(chat.sent().is_empty());
        assert_eq!(ctx.outbound_counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_send_increments_counter_and_posts_breadcrumb() {
        let mut config = config_with_target();
        config.trust.admin_room = Some("!admin:example.com".into());
        let (ctx, chat) = ctx_with(config, 0);

        let result = OutboundMessageTool
            .execute(&ctx, serde_json::json!({"target": "kumo", "message": "hello"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(ctx.outbound_counter.load(Ordering::SeqCst), 1);
        let sent = chat.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].room, "!kumo:example.com");
        assert_eq!(sent[0].text, "hello");
        assert_eq!(sent[1].room, "!admin:example.com");
        assert!(sent[1].text.contains("trace=t1"));
    }

    #[tokio::test]
    async fn rate_limited_call_does_not_send_or_increment() {
        let (ctx, chat) = ctx_with(config_with_target(), 1);
        let first = OutboundMessageTool
            .execute(&ctx, serde_json::json!({"target": "kumo", "message": "one"}))
            .await;
        assert!(!first.is_error);
        let second = OutboundMessageTool
            .execute(&ctx, serde_json::json!({"target": "kumo", "message": "two"}))
            .await;
        assert!(second.is_error);
        assert_eq!(ctx.outbound_counter.load(Ordering::SeqCst), 1);
        assert_eq!(chat.sent().len(), 1);
    }

    #[test]
    fn rate_limiter_zero_is_unlimited() {
        let limiter = RateLimiter::new(0);
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }
}
