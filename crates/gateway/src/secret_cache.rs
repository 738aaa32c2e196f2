//! Secret cache — a process-scoped, TTL-evicted map of secret name to
//! value. Values never leave this module except as owned copies to a
//! caller that resolves `{{secret:<ref>}}` placeholders; they are never
//! logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetError {
    NotFound,
    Expired,
}

struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct SecretCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-replace or extend entries with a shared TTL (seconds from now).
    pub fn apply(&self, values: HashMap<String, Vec<u8>>, ttl_seconds: u64) {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        let mut guard = self.entries.write();
        for (name, value) in values {
            guard.insert(name, Entry { value, expires_at });
        }
    }

    /// Set or extend a single secret.
    pub fn set(&self, name: impl Into<String>, value: Vec<u8>, ttl_seconds: u64) {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
        self.entries.write().insert(name.into(), Entry { value, expires_at });
    }

    pub fn get(&self, name: &str) -> Result<Vec<u8>, GetError> {
        let guard = self.entries.read();
        match guard.get(name) {
            None => Err(GetError::NotFound),
            Some(entry) if entry.expires_at <= Utc::now() => Err(GetError::Expired),
            Some(entry) => Ok(entry.value.clone()),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, GetError> {
        self.get(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Sweep entries whose TTL has passed; returns the number evicted.
    pub fn evict(&self) -> usize {
        let now = Utc::now();
        let mut guard = self.entries.write();
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        before - guard.len()
    }

    /// Snapshot of all currently cached names (never values), for
    /// building the process-environment injection map without risking a
    /// log site that formats the whole cache.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// An env-var map suitable for subprocess injection: `env_var name` →
    /// secret bytes as a UTF-8 string, given the config's secret→env_var
    /// mapping.
    pub fn as_env_map(&self, refs: &[sa_domain::config::SecretRef]) -> HashMap<String, String> {
        let guard = self.entries.read();
        let now = Utc::now();
        refs.iter()
            .filter_map(|r| {
                guard.get(&r.name).and_then(|entry| {
                    if entry.expires_at > now {
                        Some((r.env_var.clone(), String::from_utf8_lossy(&entry.value).into_owned()))
                    } else {
                        None
                    }
                })
            })
            .collect()
    }

    /// Spawn the once-a-minute background eviction sweeper. Returns a
    /// handle the caller should abort at shutdown.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let evicted = cache.evict();
                if evicted > 0 {
                    tracing::info!(evicted, "secret cache: swept expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_before_apply() {
        let cache = SecretCache::new();
        assert_eq!(cache.get("x").unwrap_err(), GetError::NotFound);
    }

    #[test]
    fn apply_then_get_round_trip() {
        let cache = SecretCache::new();
        let mut values = HashMap::new();
        values.insert("finnhub".to_string(), b"abc123".to_vec());
        cache.apply(values, 3600);
        assert_eq!(cache.get("finnhub").unwrap(), b"abc123".to_vec());
    }

    #[test]
    fn expired_entry_reports_expired() {
        let cache = SecretCache::new();
        cache.set("finnhub", b"abc".to_vec(), 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("finnhub").unwrap_err(), GetError::Expired);
    }

    #[test]
    fn evict_removes_expired_only() {
        let cache = SecretCache::new();
        cache.set("expired", b"a".to_vec(), 0);
        cache.set("fresh", b"b".to_vec(), 3600);
        std::thread::sleep(Duration::from_millis(10));
        let evicted = cache.evict();
        assert_eq!(evicted, 1);
        assert!(cache.get("fresh").is_ok());
        assert_eq!(cache.get("expired").unwrap_err(), GetError::NotFound);
    }
}
