//! `sa-supervisor` — the process supervisor.
//!
//! One generic reconcile/restart/shutdown abstraction, instantiated twice:
//! [`mcp::McpSupervisor`] for MCP tool-server subprocesses and
//! [`external_gateway::ExternalGatewaySupervisor`] for external event
//! gateways. Both share [`GenericSupervisor`]; they differ only in how a
//! process is spawned, how its exit is observed, and what decides a
//! process needs restarting (the [`ProcessKind`] hooks).

pub mod external_gateway;
pub mod mcp;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use sa_domain::error::{Error, Result};

/// Hooks that distinguish a process kind (MCP server vs. external gateway)
/// from the shared reconcile-restart-shutdown machinery.
#[async_trait]
pub trait ProcessKind: Send + Sync + 'static {
    type Spec: Clone + Send + Sync + 'static;
    type Handle: Send + Sync + 'static;

    fn name(spec: &Self::Spec) -> &str;
    fn auto_restart(spec: &Self::Spec) -> bool;

    /// Whether reconciling `old` → `new` (same name) should stop the old
    /// instance and start a new one. The MCP variant never restarts an
    /// unchanged name; the external-gateway variant compares
    /// `(command, args, env, config, auto_restart)`.
    fn needs_restart(old: &Self::Spec, new: &Self::Spec) -> bool;

    async fn spawn(spec: &Self::Spec, injected_env: &HashMap<String, String>) -> Result<Self::Handle>;

    /// Blocks until the process has exited (by whatever means this kind
    /// uses to observe liveness — polling `is_alive()` for MCP, `Child::wait`
    /// for external gateways).
    async fn wait_exited(handle: &Self::Handle);

    async fn stop(handle: &Self::Handle);
}

struct Managed<K: ProcessKind> {
    spec: K::Spec,
    handle: Arc<K::Handle>,
    stopped: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

struct Inner<K: ProcessKind> {
    processes: HashMap<String, Managed<K>>,
    injected_env: HashMap<String, String>,
}

/// Generic reconcile/restart/shutdown supervisor over a [`ProcessKind`].
pub struct GenericSupervisor<K: ProcessKind> {
    inner: Arc<Mutex<Inner<K>>>,
    restart_delay: Duration,
}

impl<K: ProcessKind> GenericSupervisor<K> {
    pub fn new(restart_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                processes: HashMap::new(),
                injected_env: HashMap::new(),
            })),
            restart_delay,
        }
    }

    /// Bulk-replace the secret-derived environment injected into every
    /// subsequently spawned process. Does not itself restart anything —
    /// callers `reconcile()` afterwards if they want the new env picked up.
    pub async fn apply_secrets(&self, env: HashMap<String, String>) {
        let mut inner = self.inner.lock().await;
        inner.injected_env = env;
    }

    /// Reconcile the declared specs against the currently running set:
    /// stop names no longer declared, start newly declared names, restart
    /// names whose spec changed per [`ProcessKind::needs_restart`], leave
    /// unchanged names alone.
    pub async fn reconcile(&self, specs: &[K::Spec]) -> Result<()> {
        let declared: HashMap<&str, &K::Spec> =
            specs.iter().map(|s| (K::name(s), s)).collect();

        let mut inner = self.inner.lock().await;
        let injected_env = inner.injected_env.clone();

        let running_names: HashSet<String> = inner.processes.keys().cloned().collect();

        // Stop names no longer declared.
        for name in running_names.iter() {
            if !declared.contains_key(name.as_str()) {
                if let Some(managed) = inner.processes.remove(name) {
                    stop_managed::<K>(managed).await;
                    tracing::info!(name, "supervisor: stopped removed process");
                }
            }
        }

        // Start new names / restart changed names.
        for (name, spec) in declared.iter() {
            let needs_restart = inner
                .processes
                .get(*name)
                .map(|m| K::needs_restart(&m.spec, spec))
                .unwrap_or(false);

            if needs_restart {
                if let Some(managed) = inner.processes.remove(*name) {
                    stop_managed::<K>(managed).await;
                    tracing::info!(name, "supervisor: restarting changed process");
                }
            }

            if !inner.processes.contains_key(*name) {
                let spec = (*spec).clone();
                match Self::start_one(&spec, &injected_env, self.restart_delay, self.inner.clone()).await {
                    Ok(managed) => {
                        inner.processes.insert(name.to_string(), managed);
                    }
                    Err(e) => {
                        tracing::warn!(name, error = %e, "supervisor: failed to start process");
                    }
                }
            }
        }

        Ok(())
    }

    async fn start_one(
        spec: &K::Spec,
        injected_env: &HashMap<String, String>,
        restart_delay: Duration,
        self_inner: Arc<Mutex<Inner<K>>>,
    ) -> Result<Managed<K>> {
        let handle = Arc::new(K::spawn(spec, injected_env).await?);
        let stopped = Arc::new(AtomicBool::new(false));
        let auto_restart = K::auto_restart(spec);
        let name = K::name(spec).to_string();

        let watcher = if auto_restart {
            let handle = handle.clone();
            let stopped = stopped.clone();
            let spec = spec.clone();
            let injected_env = injected_env.clone();
            let inner_for_watch = self_inner.clone();
            Some(tokio::spawn(async move {
                watch_and_restart::<K>(name, spec, injected_env, handle, stopped, restart_delay, inner_for_watch)
                    .await;
            }))
        } else {
            None
        };

        Ok(Managed {
            spec: spec.clone(),
            handle,
            stopped,
            watcher,
        })
    }

    /// Forcibly stop and respawn a single named process from its
    /// last-known spec, regardless of whether `needs_restart` would have
    /// fired. Used by `POST /tasks/restart`. No-op if the name isn't
    /// currently declared/running.
    pub async fn restart_one(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let injected_env = inner.injected_env.clone();

        let Some(managed) = inner.processes.remove(name) else {
            return Err(sa_domain::Error::Other(format!("restart: no running process named \"{name}\"")));
        };
        let spec = managed.spec.clone();
        stop_managed::<K>(managed).await;
        tracing::info!(name, "supervisor: restarting process on demand");

        let managed = Self::start_one(&spec, &injected_env, self.restart_delay, self.inner.clone()).await?;
        inner.processes.insert(name.to_string(), managed);
        Ok(())
    }

    /// Look up the running handle for a declared process by name.
    pub async fn lookup(&self, name: &str) -> Option<Arc<K::Handle>> {
        let inner = self.inner.lock().await;
        inner.processes.get(name).map(|m| m.handle.clone())
    }

    /// Names of currently running processes.
    pub async fn running_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.processes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every running process. Watchers are told via `stopped` first so
    /// they never race a deliberate shutdown into a restart.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let names: Vec<String> = inner.processes.keys().cloned().collect();
        for name in names {
            if let Some(managed) = inner.processes.remove(&name) {
                stop_managed::<K>(managed).await;
            }
        }
    }
}

async fn stop_managed<K: ProcessKind>(managed: Managed<K>) {
    managed.stopped.store(true, Ordering::SeqCst);
    if let Some(watcher) = managed.watcher {
        watcher.abort();
    }
    K::stop(&managed.handle).await;
}

/// Runs for the lifetime of one spawned process: waits for it to exit, and
/// if `auto_restart` is set and the supervisor hasn't deliberately stopped
/// it, relaunches after `restart_delay`. Never restarts a name the
/// supervisor stopped on purpose.
async fn watch_and_restart<K: ProcessKind>(
    name: String,
    spec: K::Spec,
    injected_env: HashMap<String, String>,
    mut handle: Arc<K::Handle>,
    stopped: Arc<AtomicBool>,
    restart_delay: Duration,
    inner: Arc<Mutex<Inner<K>>>,
) {
    loop {
        K::wait_exited(&handle).await;

        if stopped.load(Ordering::SeqCst) {
            return;
        }

        tracing::warn!(name = %name, "supervisor: process exited unexpectedly, restarting");
        tokio::time::sleep(restart_delay).await;

        if stopped.load(Ordering::SeqCst) {
            return;
        }

        match K::spawn(&spec, &injected_env).await {
            Ok(new_handle) => {
                handle = Arc::new(new_handle);
                let mut guard = inner.lock().await;
                if let Some(managed) = guard.processes.get_mut(&name) {
                    managed.handle = handle.clone();
                }
                drop(guard);
                tracing::info!(name = %name, "supervisor: restarted process");
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "supervisor: restart attempt failed, will retry");
                tokio::time::sleep(restart_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::external_gateway::{ExternalGatewaySpec, ExternalGatewaySupervisor};
    use std::time::Duration;

    #[tokio::test]
    async fn external_gateway_autorestart_and_stop() {
        let dir = std::env::temp_dir().join(format!("sa-supervisor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let marker = dir.join("tick.log");
        let _ = std::fs::remove_file(&marker);

        let spec = ExternalGatewaySpec {
            name: "flaky".into(),
            command: "/bin/sh".into(),
            args: vec![
                "-c".into(),
                format!("echo tick >> {} ; exit 1", marker.display()),
            ],
            env: Default::default(),
            config: serde_json::json!({}),
            auto_restart: true,
            target_url: "http://127.0.0.1:0/events/flaky".into(),
        };

        let supervisor = ExternalGatewaySupervisor::new(Duration::from_millis(20));
        supervisor.reconcile(&[spec]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        let contents = std::fs::read_to_string(&marker).unwrap_or_default();
        let lines = contents.lines().count();
        assert!(lines >= 3, "expected at least 3 restarts, got {lines}");

        supervisor.stop().await;
        assert!(supervisor.running_names().await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
