//! An in-memory [`ChatTransport`](super::ChatTransport) used by tests and by
//! `serialagent doctor` to exercise the turn engine without a live chat
//! fabric connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use sa_domain::Result;

use super::{ChatTransport, OnMessage};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub room: String,
    pub reply_to_event: Option<String>,
    pub text: String,
}

#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentMessage>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, room: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.room == room)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_text(&self, room: &str, text: &str) -> Result<()> {
        self.sent.lock().push(SentMessage {
            room: room.to_string(),
            reply_to_event: None,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_reply(&self, room: &str, reply_to_event: &str, text: &str) -> Result<()> {
        self.sent.lock().push(SentMessage {
            room: room.to_string(),
            reply_to_event: Some(reply_to_event.to_string()),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn start(&self, _rooms: &[String], _on_message: OnMessage) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sent_messages() {
        let transport = MockTransport::new();
        transport.send_text("!room:example.com", "hello").await.unwrap();
        transport
            .send_reply("!room:example.com", "$event1", "a reply")
            .await
            .unwrap();
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent_to("!room:example.com").len(), 2);
        assert_eq!(transport.sent()[1].reply_to_event.as_deref(), Some("$event1"));
    }
}
