//! News-agent pipeline (`canonicalName = kumo`). Answers Kairo's
//! `KAIRO_NEWS_REQUEST` envelopes with a `KUMO_NEWS_RESPONSE` carrying
//! headlines and a materiality verdict, never touching Kairo's run state
//! directly — everything crosses the chat fabric.

use serde::{Deserialize, Serialize};

use sa_domain::{Error, Result};

use crate::chat::local_part;
use crate::state::AppState;

use super::{McpNewsFetcher, NewsFetcher};

const REQUEST_PREFIX: &str = "KAIRO_NEWS_REQUEST ";
pub const RESPONSE_PREFIX: &str = "KUMO_NEWS_RESPONSE ";

/// Hard-coded materiality keywords. Not user-configurable — see the design
/// ledger's Open Question decision for why this stays an English literal
/// list rather than a per-agent config field.
const MATERIALITY_KEYWORDS: &[&str] = &[
    "earnings",
    "guidance",
    "lawsuit",
    "recall",
    "merger",
    "acquisition",
    "downgrade",
    "upgrade",
    "bankruptcy",
    "investigation",
];

#[derive(Debug, Clone, Deserialize)]
struct KairoNewsRequest {
    run_id: i64,
    tickers: Vec<String>,
    market_summary: String,
}

#[derive(Debug, Clone, Serialize)]
struct KumoNewsResponse {
    run_id: i64,
    summary: String,
    headlines: Vec<String>,
    material: bool,
}

/// Entry point for Kumo's inbound matrix messages. Returns `None` when the
/// message isn't a recognized Kairo news request (caller falls through to
/// the LLM loop).
pub async fn try_handle_matrix(state: &AppState, sender: &str, text: &str, trace_id: &str) -> Result<()> {
    if local_part(sender) != "kairo" {
        return Ok(());
    }
    let Some(payload) = text.trim().strip_prefix(REQUEST_PREFIX) else {
        return Ok(());
    };

    let request: KairoNewsRequest = serde_json::from_str(payload)
        .map_err(|e| Error::Other(format!("kumo: malformed KAIRO_NEWS_REQUEST: {e}")))?;

    let config = state
        .config()
        .ok_or_else(|| Error::Other("kumo: no active config".into()))?;

    let fetcher = McpNewsFetcher::new(state.mcp_supervisor.clone());
    let response = build_response(&fetcher, request).await;

    let body = format!("{RESPONSE_PREFIX}{}", serde_json::to_string(&response)?);
    state.send_to_target(&config, "kairo", &body).await?;

    tracing::info!(trace_id = %trace_id, run_id = response.run_id, material = response.material, "kumo: responded to news request");
    Ok(())
}

async fn build_response(fetcher: &(impl NewsFetcher + ?Sized), request: KairoNewsRequest) -> KumoNewsResponse {
    let mut headlines = Vec::new();
    for ticker in &request.tickers {
        match fetcher.fetch_headlines(ticker).await {
            Ok(found) => headlines.extend(found),
            Err(e) => tracing::warn!(ticker = %ticker, error = %e, "kumo: headline fetch failed"),
        }
    }

    let material = is_material(&headlines);
    let summary = if headlines.is_empty() {
        format!("No notable headlines found for {}.", request.tickers.join(", "))
    } else {
        format!("{} headline(s) found for {}.", headlines.len(), request.tickers.join(", "))
    };

    KumoNewsResponse {
        run_id: request.run_id,
        summary,
        headlines,
        material,
    }
}

fn is_material(headlines: &[String]) -> bool {
    headlines.iter().any(|h| {
        let lower = h.to_lowercase();
        MATERIALITY_KEYWORDS.iter().any(|kw| lower.contains(kw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedFetcher(Vec<String>);

    #[async_trait]
    impl NewsFetcher for FixedFetcher {
        async fn fetch_headlines(&self, _ticker: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn material_keyword_triggers_material_flag() {
        let fetcher = FixedFetcher(vec!["Acme announces merger with Globex".into()]);
        let response = build_response(
            &fetcher,
            KairoNewsRequest {
                run_id: 7,
                tickers: vec!["ACME".into()],
                market_summary: "flat session".into(),
            },
        )
        .await;
        assert!(response.material);
        assert_eq!(response.run_id, 7);
    }

    #[tokio::test]
    async fn no_keywords_is_not_material() {
        let fetcher = FixedFetcher(vec!["Acme opens new office".into()]);
        let response = build_response(
            &fetcher,
            KairoNewsRequest {
                run_id: 7,
                tickers: vec!["ACME".into()],
                market_summary: "flat session".into(),
            },
        )
        .await;
        assert!(!response.material);
    }

    #[tokio::test]
    async fn empty_headlines_summary() {
        let fetcher = FixedFetcher(vec![]);
        let response = build_response(
            &fetcher,
            KairoNewsRequest {
                run_id: 1,
                tickers: vec!["ZZZ".into()],
                market_summary: "flat session".into(),
            },
        )
        .await;
        assert!(!response.material);
        assert!(response.summary.contains("No notable headlines"));
    }
}
