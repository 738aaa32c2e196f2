use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sa_domain::config::ConfigSeverity;
use sa_gateway::chat::mock::MockTransport;
use sa_gateway::cli::{Cli, Command, ConfigCommand};
use sa_gateway::config_loader::ConfigLoader;
use sa_gateway::runtime::cron;
use sa_gateway::state::AppState;
use sa_gateway::tools::outbound::outbound_tool;
use sa_gateway::tools::ToolRegistry;
use sa_gateway::turn::engine::handle_matrix_message;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, config_path) = sa_gateway::cli::load_config()?;
            tracing::info!(config_path = %config_path, "loaded config");
            run_server(config).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = sa_gateway::cli::load_config()?;
            let passed = sa_gateway::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = sa_gateway::cli::load_config()?;
            if !sa_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = sa_gateway::cli::load_config()?;
            sa_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("serialagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// `serve`-only structured JSON tracing, matching `RUST_LOG`'s default of
/// `info,sa_gateway=debug` when unset.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: sa_domain::config::Config) -> anyhow::Result<()> {
    tracing::info!("serialagent starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let agent_id = config.metadata.name.clone();
    let host = config.server.host.clone();
    let port = config.server.port;
    let acp_base = format!("http://{host}:{port}");

    // ── Durable store ─────────────────────────────────────────────────
    let db_path = std::env::var("SA_DB_PATH").unwrap_or_else(|_| "agent.db".into());
    let store = sa_store::Store::open(&db_path).await.context("opening durable store")?;
    tracing::info!(path = %db_path, "durable store ready");

    // ── Config loader (re-apply the parsed config so its hash/yaml are tracked) ──
    let config_loader = Arc::new(ConfigLoader::new());
    let yaml = serde_yaml::to_string(&config).context("re-serializing loaded config")?;
    let hash = config_loader.apply(yaml.as_bytes()).map_err(|e| anyhow::anyhow!("re-applying loaded config: {e}"))?;
    store.upsert_applied_config(hash.clone(), yaml).await.context("persisting applied config")?;
    tracing::info!(hash = %hash, "config applied");

    // ── Chat transport ────────────────────────────────────────────────
    // No live chat fabric adapter ships with this runtime (the wire
    // protocol is a pluggable seam, not this crate's concern); a
    // deployment wires a real `ChatTransport` impl in, same as swapping
    // the LLM provider or MCP client. The mock keeps `serve` runnable and
    // exercises the same call paths against nothing.
    let chat: Arc<dyn sa_gateway::chat::ChatTransport> = Arc::new(MockTransport::new());
    tracing::warn!("chat transport: using in-memory mock — wire a real ChatTransport impl for production use");

    // ── Built-in tool registry ───────────────────────────────────────
    let mut tool_registry = ToolRegistry::new();
    tool_registry.register(outbound_tool());
    let tool_registry = Arc::new(tool_registry);
    tracing::info!("built-in tool registry ready");

    // ── API token (hashed once; constant-time-compared per request) ──
    let api_token = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "control-server bearer-token auth enabled");
            Some(token)
        }
        _ => {
            tracing::warn!(env_var = %config.server.api_token_env, "control-server bearer-token auth DISABLED");
            None
        }
    };

    // ── App state ─────────────────────────────────────────────────────
    let state = Arc::new(AppState::new(
        agent_id,
        acp_base,
        config_loader,
        store.clone(),
        chat.clone(),
        tool_registry,
        api_token,
        config.server.allow_legacy_secrets_apply,
    ));

    // Reconciles MCP + external-gateway supervisors, derives the outbound
    // rate limiter, and (re)builds the LLM provider — all from the config
    // just applied above.
    state.reconcile().await;
    tracing::info!(
        mcp_servers = state.running_mcp_names().await.len(),
        gateways = state.running_gateway_names().await.len(),
        "process supervisors reconciled"
    );

    // ── Secret cache sweeper ──────────────────────────────────────────
    let sweeper = state.secret_cache.spawn_sweeper();

    // ── Built-in cron gateway scheduler ───────────────────────────────
    let cron_task = cron::spawn_scheduler(state.clone());

    // ── Chat sync ──────────────────────────────────────────────────────
    let rooms = collect_rooms(&config);
    let state_for_messages = state.clone();
    chat.start(
        &rooms,
        Box::new(move |msg| {
            let state = state_for_messages.clone();
            Box::pin(async move {
                if let Err(e) = handle_matrix_message(&state, msg).await {
                    tracing::warn!(error = %e, "matrix message handling failed");
                }
            })
        }),
    )
    .await
    .context("starting chat transport")?;
    tracing::info!(rooms = rooms.len(), "chat sync started");

    // ── Control/event server ─────────────────────────────────────────
    let app = sa_gateway::server::router(state.clone());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "serialagent listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("control server error")?;

    // ── Shutdown sequence (§5): chat sync, MCP supervisor, gateway
    // supervisor, then (implicitly, by this function returning) the
    // control server has already stopped serving; the store closes last
    // as `store` drops out of scope.
    tracing::info!("serialagent shutting down");
    state.shutdown().await;
    sweeper.abort();
    cron_task.abort();

    Ok(())
}

fn collect_rooms(config: &sa_domain::config::Config) -> Vec<String> {
    let mut rooms: HashSet<String> = config.trust.allowed_rooms.iter().filter(|r| *r != "*").cloned().collect();
    rooms.extend(config.messaging.targets.iter().map(|t| t.room_id.clone()));
    if let Some(admin_room) = &config.trust.admin_room {
        rooms.insert(admin_room.clone());
    }
    rooms.into_iter().collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
