//! Canonical deterministic pipelines (§4.11): known agent identities whose
//! turns bypass the LLM entirely for recognized triggers. Kairo and Kumo
//! coordinate purely by message passing through the chat fabric — neither
//! ever reaches into the other's in-process state, even though they may
//! share a runtime in tests.

pub mod kairo;
pub mod kumo;
pub mod saito;

use async_trait::async_trait;
use sa_domain::Result;
use sa_supervisor::mcp::McpSupervisor;
use serde::Deserialize;
use std::sync::Arc;

use crate::state::AppState;

/// A single ticker's market snapshot, the shape every fetcher normalizes to
/// regardless of upstream field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketQuote {
    pub price: f64,
    pub change_percent: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
}

#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    async fn fetch(&self, ticker: &str) -> Result<MarketQuote>;
}

#[async_trait]
pub trait NewsFetcher: Send + Sync {
    async fn fetch_headlines(&self, ticker: &str) -> Result<Vec<String>>;
}

/// The default market fetcher: calls the `finnhub` MCP server's `quote`
/// tool, expecting Finnhub's own field abbreviations (`c`/`dp`/`o`/`h`/`l`/`pc`).
pub struct McpMarketDataFetcher {
    supervisor: Arc<McpSupervisor>,
}

impl McpMarketDataFetcher {
    pub fn new(supervisor: Arc<McpSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[derive(Deserialize, Default)]
struct FinnhubQuote {
    c: Option<f64>,
    dp: Option<f64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    pc: Option<f64>,
}

#[async_trait]
impl MarketDataFetcher for McpMarketDataFetcher {
    async fn fetch(&self, ticker: &str) -> Result<MarketQuote> {
        let result = self
            .supervisor
            .call_tool("finnhub", "quote", serde_json::json!({"symbol": ticker}))
            .await?;
        let text = result
            .content
            .first()
            .map(|c| c.text.as_str())
            .unwrap_or("{}");
        let quote: FinnhubQuote = serde_json::from_str(text).unwrap_or_default();
        Ok(MarketQuote {
            price: quote.c.unwrap_or(0.0),
            change_percent: quote.dp.unwrap_or(0.0),
            open: quote.o,
            high: quote.h,
            low: quote.l,
            previous_close: quote.pc,
        })
    }
}

/// The default news fetcher: calls the `brave-search` MCP server's `search`
/// tool with a heuristic "<ticker> stock news" query and extracts up to a
/// handful of line-oriented results.
pub struct McpNewsFetcher {
    supervisor: Arc<McpSupervisor>,
}

impl McpNewsFetcher {
    pub fn new(supervisor: Arc<McpSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl NewsFetcher for McpNewsFetcher {
    async fn fetch_headlines(&self, ticker: &str) -> Result<Vec<String>> {
        let query = format!("{ticker} stock news");
        let result = self
            .supervisor
            .call_tool("brave-search", "search", serde_json::json!({"q": query}))
            .await?;
        let text = result
            .content
            .first()
            .map(|c| c.text.as_str())
            .unwrap_or("");
        Ok(extract_headlines(text))
    }
}

/// Trim leading list markers (`"- "`, `"* "`, `"1. "`) from each non-empty
/// line and keep the first two.
fn extract_headlines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(strip_leading_marker)
        .take(2)
        .collect()
}

fn strip_leading_marker(line: &str) -> String {
    let stripped = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    match stripped.find(". ") {
        Some(idx) if stripped[..idx].chars().all(|c| c.is_ascii_digit()) && idx > 0 => {
            stripped[idx + 2..].to_string()
        }
        _ => stripped.to_string(),
    }
}

/// Attempt the deterministic path for an inbound chat message. Returns
/// `None` when this identity has no canonical handler (the caller falls
/// through to the LLM loop).
pub async fn try_handle_matrix(
    state: &AppState,
    canonical_name: Option<&str>,
    sender: &str,
    text: &str,
    trace_id: &str,
) -> Option<Result<()>> {
    match canonical_name {
        Some("kairo") => Some(kairo::try_handle_matrix(state, sender, text, trace_id).await),
        Some("kumo") => Some(kumo::try_handle_matrix(state, sender, text, trace_id).await),
        _ => None,
    }
}

/// Attempt the deterministic path for an inbound gateway event. Returns
/// `None` when no canonical handler recognizes this `(identity, event_type)`.
pub async fn try_handle_gateway(
    state: &AppState,
    canonical_name: Option<&str>,
    event_type: &str,
    trace_id: &str,
) -> Option<Result<()>> {
    match (canonical_name, event_type) {
        (Some("kairo"), "cron.tick") => Some(kairo::handle_trigger(state, trace_id).await),
        (Some("saito"), "cron.tick") => Some(saito::handle_cron_tick(state, trace_id).await),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_dash_marker() {
        assert_eq!(strip_leading_marker("- Apple beats earnings"), "Apple beats earnings");
    }

    #[test]
    fn strips_numbered_marker() {
        assert_eq!(strip_leading_marker("1. Apple beats earnings"), "Apple beats earnings");
    }

    #[test]
    fn extract_headlines_takes_first_two_nonblank_lines() {
        let text = "- one\n\n- two\n- three";
        assert_eq!(extract_headlines(text), vec!["one".to_string(), "two".to_string()]);
    }
}
