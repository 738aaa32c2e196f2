//! The external-gateway supervisor variant: processes speak no particular
//! protocol on stdio (unlike MCP servers) but receive `GATEWAY_TARGET_URL`
//! plus one `GATEWAY_<KEY>` per entry of the gateway's `config` map, and are
//! change-detected on `(command, args, env, config, auto_restart)` rather
//! than name alone.

use std::collections::HashMap;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sa_domain::config::GatewaySpec;
use tokio::process::Child;
use tokio::sync::Mutex as AsyncMutex;

use crate::{GenericSupervisor, ProcessKind, Result};

/// A declared external gateway spec plus the `acp_base` URL needed to build
/// its `GATEWAY_TARGET_URL`. Built-in gateway kinds (`cron`, `webhook`) are
/// filtered out by the caller before reconciling — this variant only ever
/// sees external (`command`-bearing) specs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalGatewaySpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub config: serde_json::Value,
    pub auto_restart: bool,
    pub target_url: String,
}

impl ExternalGatewaySpec {
    pub fn from_config(spec: &GatewaySpec, acp_base: &str) -> Option<Self> {
        if !spec.is_external() {
            return None;
        }
        Some(Self {
            name: spec.name.clone(),
            command: spec.command.clone().unwrap_or_default(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            config: spec.config.clone(),
            auto_restart: spec.auto_restart,
            target_url: format!("{}/events/{}", acp_base.trim_end_matches('/'), spec.name),
        })
    }
}

pub struct ExternalGatewayHandle {
    child: AsyncMutex<Child>,
    pid: Option<i32>,
}

pub struct ExternalGatewayKind;

#[async_trait]
impl ProcessKind for ExternalGatewayKind {
    type Spec = ExternalGatewaySpec;
    type Handle = ExternalGatewayHandle;

    fn name(spec: &Self::Spec) -> &str {
        &spec.name
    }

    fn auto_restart(spec: &Self::Spec) -> bool {
        spec.auto_restart
    }

    fn needs_restart(old: &Self::Spec, new: &Self::Spec) -> bool {
        old.command != new.command
            || old.args != new.args
            || old.env != new.env
            || old.config != new.config
            || old.auto_restart != new.auto_restart
    }

    async fn spawn(spec: &Self::Spec, injected_env: &HashMap<String, String>) -> Result<Self::Handle> {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        for (k, v) in injected_env {
            cmd.env(k, v);
        }
        cmd.env("GATEWAY_TARGET_URL", &spec.target_url);
        if let Some(obj) = spec.config.as_object() {
            for (key, value) in obj {
                let env_key = format!("GATEWAY_{}", key.to_uppercase());
                let env_value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(env_key, env_value);
            }
        }
        // Spec-declared env wins over everything injected above.
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let child = cmd
            .spawn()
            .map_err(|e| sa_domain::Error::Io(e))?;
        let pid = child.id().map(|p| p as i32);

        Ok(ExternalGatewayHandle {
            child: AsyncMutex::new(child),
            pid,
        })
    }

    async fn wait_exited(handle: &Self::Handle) {
        let mut child = handle.child.lock().await;
        let _ = child.wait().await;
    }

    async fn stop(handle: &Self::Handle) {
        if let Some(pid) = handle.pid {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }

        let mut child = handle.child.lock().await;
        let waited = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
        if waited.is_err() {
            tracing::warn!(pid = ?handle.pid, "external gateway did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
        }
    }
}

/// A process supervisor over external event-gateway subprocesses.
pub type ExternalGatewaySupervisor = GenericSupervisor<ExternalGatewayKind>;
