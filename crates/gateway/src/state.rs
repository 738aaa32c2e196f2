//! Process-wide shared state (§9 "Global mutable state"). Every piece that
//! must be process-wide — the active config, the LLM provider handle, the
//! secret cache — is an explicit object owned here and accessed through
//! locked accessors; there are no hidden singletons.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::config::{AuthMode, Config, ProviderConfig, ProviderKind};
use sa_domain::{Error, Result};
use sa_providers::LlmProvider;
use sa_store::Store;
use sa_supervisor::external_gateway::{ExternalGatewaySpec, ExternalGatewaySupervisor};
use sa_supervisor::mcp::McpSupervisor;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGate;
use crate::chat::ChatTransport;
use crate::config_loader::ConfigLoader;
use crate::secret_cache::SecretCache;
use crate::tools::outbound::RateLimiter;
use crate::tools::ToolRegistry;
use crate::turn::canonical::{McpMarketDataFetcher, McpNewsFetcher, MarketDataFetcher, NewsFetcher};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub acp_base: String,

    pub config_loader: Arc<ConfigLoader>,
    pub store: Store,
    pub secret_cache: SecretCache,
    pub mcp_supervisor: Arc<McpSupervisor>,
    pub gateway_supervisor: Arc<ExternalGatewaySupervisor>,
    pub chat: Arc<dyn ChatTransport>,
    pub tool_registry: Arc<ToolRegistry>,
    pub approval_gate: Arc<ApprovalGate>,
    pub outbound_counter: Arc<AtomicU64>,
    pub rate_limiter: Arc<AsyncMutex<Arc<RateLimiter>>>,

    active_provider: RwLock<Option<Arc<dyn LlmProvider>>>,

    pub api_token: Option<String>,
    pub allow_legacy_secrets_apply: bool,

    active_turns: AsyncMutex<HashMap<String, CancellationToken>>,
}

impl AppState {
    pub fn new(
        agent_id: String,
        acp_base: String,
        config_loader: Arc<ConfigLoader>,
        store: Store,
        chat: Arc<dyn ChatTransport>,
        tool_registry: Arc<ToolRegistry>,
        api_token: Option<String>,
        allow_legacy_secrets_apply: bool,
    ) -> Self {
        let secret_cache = SecretCache::new();
        let approval_gate = Arc::new(ApprovalGate::new(store.clone(), chat.clone()));
        Self {
            agent_id,
            started_at: Utc::now(),
            acp_base,
            config_loader,
            store,
            secret_cache,
            mcp_supervisor: Arc::new(McpSupervisor::new(Duration::from_secs(5))),
            gateway_supervisor: Arc::new(ExternalGatewaySupervisor::new(Duration::from_secs(5))),
            chat,
            tool_registry,
            approval_gate,
            outbound_counter: Arc::new(AtomicU64::new(0)),
            rate_limiter: Arc::new(AsyncMutex::new(Arc::new(RateLimiter::new(0)))),
            active_provider: RwLock::new(None),
            api_token,
            allow_legacy_secrets_apply,
            active_turns: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> Option<Config> {
        self.config_loader.config()
    }

    pub fn active_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.active_provider.read().clone()
    }

    /// Reconcile both process supervisors against the currently applied
    /// config, re-derive the outbound rate limiter from
    /// `messaging.max_per_minute`, and attempt an LLM provider rebuild.
    /// Called after every successful config apply and after a secret
    /// refresh (§4.9, §4.10).
    pub async fn reconcile(&self) {
        let Some(config) = self.config() else {
            return;
        };

        if let Err(e) = self.mcp_supervisor.reconcile(&config.mcp.servers).await {
            tracing::warn!(error = %e, "failed to reconcile MCP supervisor");
        }

        let external_specs: Vec<ExternalGatewaySpec> = config
            .gateways
            .gateways
            .iter()
            .filter_map(|g| ExternalGatewaySpec::from_config(g, &self.acp_base))
            .collect();
        if let Err(e) = self.gateway_supervisor.reconcile(&external_specs).await {
            tracing::warn!(error = %e, "failed to reconcile external-gateway supervisor");
        }

        {
            let mut limiter = self.rate_limiter.lock().await;
            *limiter = Arc::new(RateLimiter::new(config.messaging.max_per_minute));
        }

        self.rebuild_provider(&config).await;
    }

    /// Re-inject the secret cache's current values as process environment
    /// for both supervisor variants, keyed by each `secrets.secrets[].env_var`.
    pub async fn apply_secret_env(&self) {
        let Some(config) = self.config() else {
            return;
        };
        let env = self.secret_cache.as_env_map(&config.secrets.secrets);
        self.mcp_supervisor.apply_secrets(env.clone()).await;
        self.gateway_supervisor.apply_secrets(env).await;
    }

    /// Attempt to (re)build the active LLM provider for the configured
    /// persona. If the persona names a secret ref and the cache has it,
    /// build using that key; otherwise fall back to the provider's
    /// `auth.env`-resolved static registry entry. Failure leaves the
    /// previous provider (if any) in place and only logs a warning — never
    /// propagated, matching the "rebuild" call sites, which are fire-and-forget.
    pub async fn rebuild_provider(&self, config: &Config) {
        let Some(persona) = &config.persona else {
            return;
        };
        let Some(provider_cfg) = config.llm.providers.iter().find(|p| p.id == persona.provider_id) else {
            tracing::warn!(provider_id = %persona.provider_id, "rebuild: persona references unknown provider");
            return;
        };

        let provider = match self.build_provider(provider_cfg, &config.llm, persona.api_key_secret_ref.as_deref()) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(provider_id = %provider_cfg.id, error = %e, "LLM provider rebuild failed, keeping previous provider");
                return;
            }
        };

        *self.active_provider.write() = Some(provider);
        tracing::info!(provider_id = %provider_cfg.id, "LLM provider (re)built");
    }

    fn build_provider(
        &self,
        provider_cfg: &ProviderConfig,
        llm: &sa_domain::config::LlmConfig,
        secret_ref: Option<&str>,
    ) -> Result<Arc<dyn LlmProvider>> {
        // A secret-cache hit takes priority over the provider's configured
        // `auth.env` — constructed directly via the explicit-key constructor.
        if let Some(key) = secret_ref.and_then(|name| self.secret_cache.get_string(name).ok()) {
            let provider: Arc<dyn LlmProvider> = match provider_cfg.kind {
                ProviderKind::OpenaiCompat => Arc::new(
                    sa_providers::openai_compat::OpenAiCompatProvider::with_api_key(provider_cfg, llm, key)
                        .map_err(|e| Error::Other(format!("provider rebuild: {e}")))?,
                ),
                ProviderKind::Anthropic => Arc::new(
                    sa_providers::anthropic::AnthropicProvider::with_api_key(provider_cfg, llm, key)
                        .map_err(|e| Error::Other(format!("provider rebuild: {e}")))?,
                ),
            };
            return Ok(provider);
        }

        // Fall back to the registry's normal env-resolved construction path.
        let solo_llm = sa_domain::config::LlmConfig {
            request_timeout_ms: llm.request_timeout_ms,
            providers: vec![provider_cfg.clone()],
        };
        let registry = sa_providers::ProviderRegistry::from_config(&solo_llm);
        registry.get(&provider_cfg.id).ok_or_else(|| {
            Error::Other(format!(
                "provider rebuild: failed to initialize provider \"{}\" from env",
                provider_cfg.id
            ))
        })
    }

    /// Resolve a messaging target alias and send through the chat
    /// transport, incrementing the outbound counter on success. Used by
    /// the canonical deterministic pipelines, which bypass the LLM tool
    /// loop (and its policy/rate-limit gating) entirely per design note.
    pub async fn send_to_target(&self, config: &Config, alias: &str, text: &str) -> Result<()> {
        let room_id = config
            .messaging
            .resolve(alias)
            .ok_or_else(|| Error::Other(format!("unknown messaging target alias \"{alias}\"")))?
            .to_string();
        self.chat.send_text(&room_id, text).await?;
        self.outbound_counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn register_turn(&self, trace_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.active_turns.lock().await.insert(trace_id.to_string(), token.clone());
        token
    }

    pub async fn finish_turn(&self, trace_id: &str) {
        self.active_turns.lock().await.remove(trace_id);
    }

    /// Non-blocking signal to every currently running turn to abort
    /// (`POST /tasks/cancel`).
    pub async fn cancel_all_turns(&self) {
        for token in self.active_turns.lock().await.values() {
            token.cancel();
        }
    }

    /// `POST /tasks/restart`: force a named subprocess to stop and respawn,
    /// regardless of whether its declared spec actually changed. Tries the
    /// MCP supervisor first, then the external-gateway supervisor.
    pub async fn restart_process(&self, name: &str) -> Result<()> {
        if self.mcp_supervisor.restart_one(name).await.is_ok() {
            return Ok(());
        }
        self.gateway_supervisor.restart_one(name).await
    }

    pub async fn running_mcp_names(&self) -> Vec<String> {
        self.mcp_supervisor.running_names().await
    }

    pub async fn running_gateway_names(&self) -> Vec<String> {
        self.gateway_supervisor.running_names().await
    }

    pub fn outbound_count(&self) -> u64 {
        self.outbound_counter.load(Ordering::SeqCst)
    }

    /// Shutdown in the order the concurrency model requires: chat sync,
    /// then MCP supervisor, then gateway supervisor. The control server and
    /// store are closed by the caller after this returns.
    pub async fn shutdown(&self) {
        self.chat.stop().await;
        self.mcp_supervisor.stop().await;
        self.gateway_supervisor.stop().await;
    }
}

/// A snapshot for `GET /status`.
pub struct StatusSnapshot {
    pub agent_id: String,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub config_hash: Option<String>,
    pub mcp_names: Vec<String>,
    pub gateway_names: Vec<String>,
    pub messages_outbound: u64,
}

impl AppState {
    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            agent_id: self.agent_id.clone(),
            version: VERSION,
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            config_hash: self.config_loader.hash(),
            mcp_names: self.running_mcp_names().await,
            gateway_names: self.running_gateway_names().await,
            messages_outbound: self.outbound_count(),
        }
    }
}
