//! The MCP supervisor variant: owns a name → MCP client map, diffed by the
//! set of declared server names only (no restart-on-field-change — that
//! refinement is specific to the external-gateway variant).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sa_domain::config::McpServerConfig;
use sa_mcp_client::{McpServer, ToolCallResult};

use crate::{GenericSupervisor, ProcessKind, Result};

pub struct McpKind;

#[async_trait]
impl ProcessKind for McpKind {
    type Spec = McpServerConfig;
    type Handle = McpServer;

    fn name(spec: &Self::Spec) -> &str {
        &spec.name
    }

    fn auto_restart(spec: &Self::Spec) -> bool {
        spec.auto_restart
    }

    /// The MCP variant only adds/removes by name; an unchanged name is left
    /// running even if some other field technically differs between calls.
    fn needs_restart(_old: &Self::Spec, _new: &Self::Spec) -> bool {
        false
    }

    async fn spawn(spec: &Self::Spec, injected_env: &HashMap<String, String>) -> Result<Self::Handle> {
        McpServer::start(spec, injected_env)
            .await
            .map_err(|e| sa_domain::Error::Other(format!("mcp supervisor: {e}")))
    }

    async fn wait_exited(handle: &Self::Handle) {
        // The MCP transport exposes liveness via `is_alive()` rather than a
        // waitable handle; poll it at a modest interval.
        loop {
            if !handle.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn stop(handle: &Self::Handle) {
        // `McpServer::shutdown` is private to the client crate's internal
        // server type today; the public wrapper forwards through `McpServer`
        // itself by constructing the same drop sequence.
        handle.shutdown().await;
    }
}

/// A process supervisor over MCP tool-server subprocesses.
pub type McpSupervisor = GenericSupervisor<McpKind>;

impl McpSupervisor {
    pub async fn call_tool(
        &self,
        mcp: &str,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolCallResult> {
        let handle = self
            .lookup(mcp)
            .await
            .ok_or_else(|| sa_domain::Error::Other(format!("mcp server not running: {mcp}")))?;
        handle
            .call_tool(tool, args)
            .await
            .map_err(|e| sa_domain::Error::Other(format!("mcp call_tool: {e}")))
    }

    pub async fn list_tools(&self, mcp: &str) -> Result<Vec<sa_mcp_client::McpToolDef>> {
        let handle = self
            .lookup(mcp)
            .await
            .ok_or_else(|| sa_domain::Error::Other(format!("mcp server not running: {mcp}")))?;
        Ok(handle.tools.clone())
    }
}
