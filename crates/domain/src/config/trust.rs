use serde::{Deserialize, Serialize};

/// Room/sender allowlists and the admin room used for gateway events and
/// approval requests. Wildcard `"*"` entries match anything.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrustConfig {
    #[serde(default)]
    pub allowed_rooms: Vec<String>,
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default)]
    pub admin_room: Option<String>,
    #[serde(default)]
    pub require_e2ee: bool,
}

impl TrustConfig {
    /// Wildcard-aware membership check shared by room and sender lists.
    fn matches(list: &[String], value: &str) -> bool {
        list.iter().any(|entry| entry == "*" || entry == value)
    }

    pub fn is_room_allowed(&self, room_id: &str) -> bool {
        Self::matches(&self.allowed_rooms, room_id)
    }

    pub fn is_sender_allowed(&self, sender_mxid: &str) -> bool {
        Self::matches(&self.allowed_senders, sender_mxid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_anything() {
        let trust = TrustConfig {
            allowed_rooms: vec!["*".into()],
            ..Default::default()
        };
        assert!(trust.is_room_allowed("!anything:example.com"));
    }

    #[test]
    fn exact_match_required_without_wildcard() {
        let trust = TrustConfig {
            allowed_senders: vec!["@alice:example.com".into()],
            ..Default::default()
        };
        assert!(trust.is_sender_allowed("@alice:example.com"));
        assert!(!trust.is_sender_allowed("@bob:example.com"));
    }

    #[test]
    fn empty_list_allows_nothing() {
        let trust = TrustConfig::default();
        assert!(!trust.is_room_allowed("!x:example.com"));
    }
}
