//! Hot-reloadable configuration loader — parses, validates, hashes, and
//! atomically swaps the active agent config under an exclusive lock.

use parking_lot::RwLock;
use sa_domain::config::Config;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("malformed config: {0}")]
    Malformed(String),
    #[error("invalid config:\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Invalid(Vec<sa_domain::config::ConfigError>),
}

struct Loaded {
    config: Config,
    hash: String,
    yaml: String,
}

/// Owns the active config exclusively. Readers take a snapshot under a
/// read lock; `apply` takes the write lock for the duration of the swap
/// only — parsing and validation happen before the lock is acquired.
pub struct ConfigLoader {
    active: RwLock<Option<Loaded>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Parse `bytes` as YAML (the wire format accepted by `POST
    /// /config/apply`; also accepts our own serialized config on disk),
    /// validate it, and — only if both succeed — atomically replace the
    /// active config. On any failure the previous config (if any) is left
    /// completely untouched.
    pub fn apply(&self, bytes: &[u8]) -> Result<String, LoadError> {
        let yaml = String::from_utf8_lossy(bytes).into_owned();

        let config: Config = serde_yaml::from_str(&yaml)
            .map_err(|e| LoadError::Malformed(e.to_string()))?;

        let issues = config.validate();
        let errors: Vec<_> = issues
            .into_iter()
            .filter(|e| e.severity == sa_domain::config::ConfigSeverity::Error)
            .collect();
        if !errors.is_empty() {
            return Err(LoadError::Invalid(errors));
        }

        let hash = content_hash(&yaml);

        let mut guard = self.active.write();
        *guard = Some(Loaded {
            config,
            hash: hash.clone(),
            yaml,
        });

        Ok(hash)
    }

    /// Load from a file path at process startup. Returns `Ok(None)` if the
    /// file does not exist yet (a fresh agent with no config applied).
    pub fn load_file(&self, path: &std::path::Path) -> anyhow::Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        Ok(Some(self.apply(&bytes)?))
    }

    /// A cheap snapshot of the active config, or `None` if nothing has ever
    /// been applied.
    pub fn config(&self) -> Option<Config> {
        self.active.read().as_ref().map(|l| l.config.clone())
    }

    pub fn hash(&self) -> Option<String> {
        self.active.read().as_ref().map(|l| l.hash.clone())
    }

    pub fn yaml(&self) -> Option<String> {
        self.active.read().as_ref().map(|l| l.yaml.clone())
    }
}

fn content_hash(yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(yaml.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
apiVersion: agent/v1
metadata:
  name: test-agent
server:
  port: 3210
  host: 127.0.0.1
llm:
  providers:
    - id: openai
      kind: openai_compat
      base_url: https://api.openai.com/v1
      auth:
        mode: api_key
        env: OPENAI_API_KEY
persona:
  system_prompt: "You are a helpful agent."
  provider_id: openai
  model_id: gpt-4o
"#;

    #[test]
    fn apply_valid_config_succeeds() {
        let loader = ConfigLoader::new();
        let hash = loader.apply(VALID.as_bytes()).unwrap();
        assert!(!hash.is_empty());
        assert_eq!(loader.hash().unwrap(), hash);
        assert!(loader.config().is_some());
    }

    #[test]
    fn malformed_config_leaves_previous_intact() {
        let loader = ConfigLoader::new();
        loader.apply(VALID.as_bytes()).unwrap();
        let hash_before = loader.hash();
        let config_before = loader.config().unwrap().metadata.name.clone();

        let result = loader.apply(b"not: [valid: yaml: at: all");
        assert!(result.is_err());
        assert_eq!(loader.hash(), hash_before);
        assert_eq!(loader.config().unwrap().metadata.name, config_before);
    }

    #[test]
    fn invalid_config_leaves_previous_intact() {
        let loader = ConfigLoader::new();
        loader.apply(VALID.as_bytes()).unwrap();
        let hash_before = loader.hash();

        let result = loader.apply(b"apiVersion: wrong/v0\nmetadata:\n  name: x\n");
        assert!(matches!(result, Err(LoadError::Invalid(_))));
        assert_eq!(loader.hash(), hash_before);
    }

    #[test]
    fn no_config_before_first_apply() {
        let loader = ConfigLoader::new();
        assert!(loader.config().is_none());
        assert!(loader.hash().is_none());
    }

    #[test]
    fn deterministic_hash() {
        let loader = ConfigLoader::new();
        let h1 = loader.apply(VALID.as_bytes()).unwrap();
        let loader2 = ConfigLoader::new();
        let h2 = loader2.apply(VALID.as_bytes()).unwrap();
        assert_eq!(h1, h2);
    }
}
