//! CLI surface (§10). `serve` is the default when no subcommand is given.

pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// serialagent — an autonomous agent runtime core.
#[derive(Debug, Parser)]
#[command(name = "serialagent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the control/event server and turn engine (default).
    Serve,
    /// Load config, validate it, and probe MCP command reachability and
    /// store-path writability.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any validation issues.
    Validate,
    /// Dump the resolved configuration as TOML, with secret-reference
    /// fields redacted.
    Show,
}

/// Load the configuration from the path named by `SA_CONFIG` (default
/// `agent.yaml`). Returns the parsed config and the path used. A missing
/// file yields `Config::default()`, matching the teacher's "no config
/// file yet" convention.
pub fn load_config() -> anyhow::Result<(sa_domain::config::Config, String)> {
    let config_path = std::env::var("SA_CONFIG").unwrap_or_else(|_| "agent.yaml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        serde_yaml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        sa_domain::config::Config::default()
    };

    Ok((config, config_path))
}
