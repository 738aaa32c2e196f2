//! `sa-gateway` — the agent runtime: turn engine, canonical deterministic
//! pipelines, built-in tools, approval gate, process supervision wiring,
//! and the control/event ingress server. `serialagent` (`main.rs`) is a
//! thin CLI shell around this crate.

pub mod approval;
pub mod chat;
pub mod cli;
pub mod config_loader;
pub mod prompt;
pub mod runtime;
pub mod secret_cache;
pub mod server;
pub mod state;
pub mod tools;
pub mod turn;
