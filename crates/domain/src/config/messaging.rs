use serde::{Deserialize, Serialize};

/// A named chat-fabric room this agent may address by alias instead of
/// raw room ID, e.g. for canonical-pipeline inter-agent handoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingTarget {
    pub alias: String,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagingConfig {
    #[serde(default)]
    pub targets: Vec<MessagingTarget>,
    #[serde(default)]
    pub max_per_minute: u32,
}

impl MessagingConfig {
    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.targets
            .iter()
            .find(|t| t.alias == alias)
            .map(|t| t.room_id.as_str())
    }

    pub fn has_duplicate_alias(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.targets.iter().any(|t| !seen.insert(&t.alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_alias() {
        let cfg = MessagingConfig {
            targets: vec![MessagingTarget {
                alias: "kumo".into(),
                room_id: "!kumo:example.com".into(),
            }],
            max_per_minute: 0,
        };
        assert_eq!(cfg.resolve("kumo"), Some("!kumo:example.com"));
        assert_eq!(cfg.resolve("unknown"), None);
    }

    #[test]
    fn detects_duplicate_alias() {
        let cfg = MessagingConfig {
            targets: vec![
                MessagingTarget {
                    alias: "kumo".into(),
                    room_id: "!a:example.com".into(),
                },
                MessagingTarget {
                    alias: "kumo".into(),
                    room_id: "!b:example.com".into(),
                },
            ],
            max_per_minute: 0,
        };
        assert!(cfg.has_duplicate_alias());
    }
}
