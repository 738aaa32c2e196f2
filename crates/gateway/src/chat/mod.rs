//! Pluggable chat transport. The wire protocol of any given fabric (Matrix
//! sync, a test double, anything else) is out of scope here — this module
//! only defines the seam the turn engine and built-in tools call through.

pub mod mock;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use sa_domain::Result;

/// Callback invoked for each inbound text message the transport observes,
/// once per room per message, in arrival order.
pub type OnMessage = Box<
    dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub room_id: String,
    pub sender: String,
    pub event_id: String,
    pub text: String,
}

/// The seam every chat fabric adapter implements. Room ids and sender ids
/// are opaque strings as far as this crate is concerned; wildcard and
/// prefix conventions (e.g. `local-part` extraction) are applied by callers.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, room: &str, text: &str) -> Result<()>;

    async fn send_reply(&self, room: &str, reply_to_event: &str, text: &str) -> Result<()>;

    /// Begin syncing `rooms`, invoking `on_message` for every inbound text
    /// event. Returns once the initial connection is established; delivery
    /// continues on a background task until `stop()`.
    async fn start(&self, rooms: &[String], on_message: OnMessage) -> Result<()>;

    async fn stop(&self);
}

/// Extract the local-part of an opaque sender id, e.g. `@kumo:example.com`
/// → `kumo`. Falls back to the full id when no `@`/`:` delimiters are
/// present, so plain test sender ids (`"kumo"`) still work.
pub fn local_part(sender: &str) -> &str {
    let s = sender.strip_prefix('@').unwrap_or(sender);
    match s.find(':') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_part_strips_matrix_id() {
        assert_eq!(local_part("@kumo:example.com"), "kumo");
    }

    #[test]
    fn local_part_passthrough_for_bare_name() {
        assert_eq!(local_part("kumo"), "kumo");
    }
}
