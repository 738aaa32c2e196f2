//! Portfolio-analyst pipeline (`canonicalName = kairo`). Owns the
//! persisted portfolio and the per-cycle analysis run, and coordinates
//! with Kumo purely through `KAIRO_NEWS_REQUEST`/`KUMO_NEWS_RESPONSE`
//! chat-fabric envelopes — never by calling into Kumo's process directly.

use std::collections::HashMap;

use serde::Deserialize;

use sa_domain::{Error, Result};
use sa_store::models::{NewAnalysisRun, NewTickerMetric, Portfolio, PortfolioPosition};

use crate::chat::local_part;
use crate::state::AppState;

use super::{kumo, MarketDataFetcher, MarketQuote, McpMarketDataFetcher};

const PREFIXES: &[&str] = &["portfolio:", "portfolio ", "set portfolio "];

/// Tickers whose absolute change meets this threshold are always included
/// in a news request, regardless of how many others qualify.
const MATERIAL_CHANGE_THRESHOLD: f64 = 1.0;
/// A run is notified only when its largest move is at least this large
/// (unless Kumo itself already flagged the news as material).
const NOTIFY_CHANGE_THRESHOLD: f64 = 2.0;
/// At most this many `notified` runs are allowed per rolling hour.
const MAX_NOTIFIED_PER_HOUR: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
struct KumoNewsResponse {
    run_id: i64,
    summary: String,
    headlines: Vec<String>,
    material: bool,
}

/// Single entrypoint for every inbound matrix message addressed to a
/// `kairo`-identity agent: portfolio updates, Kumo's news response, and
/// Saito's scheduled trigger all arrive as ordinary chat messages.
/// Anything else is a deterministic no-op — canonical identities never
/// fall back to the LLM.
pub async fn try_handle_matrix(state: &AppState, sender: &str, text: &str, trace_id: &str) -> Result<()> {
    let trimmed = text.trim();

    if let Some(rest) = strip_portfolio_prefix(trimmed) {
        return handle_set_portfolio(state, rest, trace_id).await;
    }

    if let Some(payload) = trimmed.strip_prefix(kumo::RESPONSE_PREFIX) {
        return handle_kumo_response(state, payload, trace_id).await;
    }

    if is_trigger_message(sender, trimmed) {
        return handle_trigger(state, trace_id).await;
    }

    Ok(())
}

fn strip_portfolio_prefix(text: &str) -> Option<&str> {
    for prefix in PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    None
}

fn is_trigger_message(sender: &str, text: &str) -> bool {
    if local_part(sender) == "saito" {
        return true;
    }
    let lower = text.to_lowercase();
    lower.contains("saito scheduled trigger") || lower.contains("portfolio analysis cycle")
}

// ── Portfolio set ───────────────────────────────────────────────────

async fn handle_set_portfolio(state: &AppState, body: &str, trace_id: &str) -> Result<()> {
    let config = state.config().ok_or_else(|| Error::Other("kairo: no active config".into()))?;

    match parse_positions(body) {
        Ok(positions) => {
            let portfolio = Portfolio { positions };
            state.store.upsert_portfolio(&portfolio).await.map_err(Error::from)?;

            let summary = portfolio
                .positions
                .iter()
                .map(|p| format!("{} ({:.2}%)", p.ticker, p.allocation))
                .collect::<Vec<_>>()
                .join(", ");
            let ack = format!("Portfolio updated: {summary}");
            if let Err(e) = state.send_to_target(&config, "user", &ack).await {
                tracing::warn!(trace_id = %trace_id, error = %e, "kairo: failed to send portfolio ack");
            }
            Ok(())
        }
        Err(reason) => {
            let message = format!("Could not update portfolio: {reason}");
            if let Err(e) = state.send_to_target(&config, "user", &message).await {
                tracing::warn!(trace_id = %trace_id, error = %e, "kairo: failed to send portfolio error");
            }
            Ok(())
        }
    }
}

fn parse_positions(body: &str) -> std::result::Result<Vec<PortfolioPosition>, String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err("empty portfolio body".into());
    }

    let raw: Vec<(String, f64)> = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_json_positions(trimmed)?
    } else {
        parse_pair_positions(trimmed)?
    };

    if raw.is_empty() {
        return Err("no positions found".into());
    }

    let mut seen = std::collections::HashSet::new();
    let mut positions = Vec::with_capacity(raw.len());
    for (ticker, allocation) in raw {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err("empty ticker symbol".into());
        }
        if allocation <= 0.0 {
            return Err(format!("allocation for {ticker} must be positive"));
        }
        if !seen.insert(ticker.clone()) {
            return Err(format!("duplicate ticker {ticker}"));
        }
        positions.push(PortfolioPosition { ticker, allocation });
    }

    positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    Ok(positions)
}

fn parse_json_positions(text: &str) -> std::result::Result<Vec<(String, f64)>, String> {
    if let Ok(map) = serde_json::from_str::<HashMap<String, f64>>(text) {
        return Ok(map.into_iter().collect());
    }
    if let Ok(list) = serde_json::from_str::<Vec<PortfolioPosition>>(text) {
        return Ok(list.into_iter().map(|p| (p.ticker, p.allocation)).collect());
    }
    Err("malformed JSON portfolio body".into())
}

fn parse_pair_positions(text: &str) -> std::result::Result<Vec<(String, f64)>, String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (ticker, allocation) = if let Some((t, a)) = pair.split_once('=') {
                (t, a)
            } else if let Some((t, a)) = pair.split_once(':') {
                (t, a)
            } else {
                return Err(format!("malformed pair \"{pair}\" (expected TICKER=ALLOCATION)"));
            };
            let allocation: f64 = allocation
                .trim()
                .parse()
                .map_err(|_| format!("invalid allocation \"{allocation}\" for {ticker}"))?;
            Ok((ticker.trim().to_string(), allocation))
        })
        .collect()
}

// ── Scheduled trigger ────────────────────────────────────────────────

/// Run a portfolio-analysis cycle. Reachable either directly from Kairo's
/// own `cron.tick` gateway event, or indirectly via a chat message from
/// Saito (see `is_trigger_message`).
pub async fn handle_trigger(state: &AppState, trace_id: &str) -> Result<()> {
    let config = state.config().ok_or_else(|| Error::Other("kairo: no active config".into()))?;

    let Some(portfolio) = state.store.get_portfolio().await.map_err(Error::from)? else {
        state
            .send_to_target(
                &config,
                "user",
                "No portfolio configured yet. Reply with `portfolio: TICKER=ALLOCATION, ...` to set one.",
            )
            .await?;
        state
            .store
            .insert_analysis_run(NewAnalysisRun {
                trace_id: trace_id.to_string(),
                trigger_source: "scheduler".into(),
                room_id: None,
                status: "waiting_portfolio".into(),
                summary: None,
                commentary: None,
                tickers: vec![],
            })
            .await
            .map_err(Error::from)?;
        return Ok(());
    };

    let fetcher = McpMarketDataFetcher::new(state.mcp_supervisor.clone());
    let mut tickers = Vec::with_capacity(portfolio.positions.len());
    for position in &portfolio.positions {
        let quote = fetcher.fetch(&position.ticker).await.unwrap_or_else(|e| {
            tracing::warn!(ticker = %position.ticker, error = %e, "kairo: market data fetch failed");
            MarketQuote::default()
        });
        tickers.push(NewTickerMetric {
            ticker: position.ticker.clone(),
            allocation: position.allocation,
            price: Some(quote.price),
            change_percent: Some(quote.change_percent),
            open: quote.open,
            high: quote.high,
            low: quote.low,
            previous_close: quote.previous_close,
            metrics_json: None,
            commentary: None,
        });
    }

    let summary = tickers
        .iter()
        .map(|t| format!("{} {:+.2}%", t.ticker, t.change_percent.unwrap_or(0.0)))
        .collect::<Vec<_>>()
        .join(", ");
    let commentary = largest_move_commentary(&tickers);
    let changes: HashMap<String, f64> = tickers
        .iter()
        .map(|t| (t.ticker.clone(), t.change_percent.unwrap_or(0.0)))
        .collect();

    let run_id = state
        .store
        .insert_analysis_run(NewAnalysisRun {
            trace_id: trace_id.to_string(),
            trigger_source: "scheduler".into(),
            room_id: None,
            status: "awaiting_news".into(),
            summary: Some(summary.clone()),
            commentary: Some(commentary.clone()),
            tickers,
        })
        .await
        .map_err(Error::from)?;

    let selected = select_news_tickers(&portfolio.positions, &changes);
    let request = serde_json::json!({"run_id": run_id, "tickers": selected, "market_summary": summary});
    let body = format!("KAIRO_NEWS_REQUEST {request}");
    state.send_to_target(&config, "kumo", &body).await?;

    tracing::info!(trace_id = %trace_id, run_id, "kairo: dispatched news request to kumo");
    Ok(())
}

fn largest_move_commentary(tickers: &[NewTickerMetric]) -> String {
    let Some(largest) = tickers.iter().max_by(|a, b| {
        a.change_percent
            .unwrap_or(0.0)
            .abs()
            .total_cmp(&b.change_percent.unwrap_or(0.0).abs())
    }) else {
        return "No positions to analyze.".into();
    };
    format!(
        "Largest move: {} ({:+.2}%)",
        largest.ticker,
        largest.change_percent.unwrap_or(0.0)
    )
}

fn select_news_tickers(positions: &[PortfolioPosition], changes: &HashMap<String, f64>) -> Vec<String> {
    let mut selected: Vec<String> = positions
        .iter()
        .filter(|p| changes.get(&p.ticker).copied().unwrap_or(0.0).abs() >= MATERIAL_CHANGE_THRESHOLD)
        .map(|p| p.ticker.clone())
        .collect();

    if selected.is_empty() {
        if let Some(strongest) = positions.iter().max_by(|a, b| {
            changes
                .get(&a.ticker)
                .copied()
                .unwrap_or(0.0)
                .abs()
                .total_cmp(&changes.get(&b.ticker).copied().unwrap_or(0.0).abs())
        }) {
            selected.push(strongest.ticker.clone());
        }
    }

    selected.sort();
    selected.dedup();
    selected
}

// ── Kumo response ────────────────────────────────────────────────────

async fn handle_kumo_response(state: &AppState, payload: &str, trace_id: &str) -> Result<()> {
    let config = state.config().ok_or_else(|| Error::Other("kairo: no active config".into()))?;

    let response: KumoNewsResponse = serde_json::from_str(payload.trim())
        .map_err(|e| Error::Other(format!("kairo: malformed KUMO_NEWS_RESPONSE: {e}")))?;

    let Some(run) = state.store.get_analysis_run(response.run_id).await.map_err(Error::from)? else {
        tracing::warn!(run_id = response.run_id, "kairo: kumo response for unknown run");
        return Ok(());
    };

    let max_abs_change = state.store.max_abs_change(run.id).await.map_err(Error::from)?;
    let material_final = response.material || max_abs_change >= NOTIFY_CHANGE_THRESHOLD;

    if !material_final {
        state
            .store
            .update_analysis_run_status(run.id, "logged_no_notify", None)
            .await
            .map_err(Error::from)?;
        return Ok(());
    }

    let notified_recently = state.store.count_notified_runs_last_hour().await.map_err(Error::from)?;
    if notified_recently >= MAX_NOTIFIED_PER_HOUR {
        state
            .store
            .update_analysis_run_status(run.id, "rate_limited", None)
            .await
            .map_err(Error::from)?;
        return Ok(());
    }

    let headlines = if response.headlines.is_empty() {
        String::new()
    } else {
        format!("\n{}", response.headlines.join("\n"))
    };
    let report = format!(
        "Kairo final report (run_id={}): {}{}",
        run.id, response.summary, headlines
    );
    state.send_to_target(&config, "user", &report).await?;

    state
        .store
        .update_analysis_run_status(run.id, "notified", Some(response.summary.clone()))
        .await
        .map_err(Error::from)?;

    tracing::info!(trace_id = %trace_id, run_id = run.id, "kairo: sent final report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_pairs() {
        let positions = parse_positions("AAPL=60,MSFT=40").unwrap();
        assert_eq!(positions, vec![
            PortfolioPosition { ticker: "AAPL".into(), allocation: 60.0 },
            PortfolioPosition { ticker: "MSFT".into(), allocation: 40.0 },
        ]);
    }

    #[test]
    fn parses_colon_pairs_when_no_equals() {
        let positions = parse_positions("aapl:60, msft:40").unwrap();
        assert_eq!(positions[0].ticker, "AAPL");
        assert_eq!(positions[1].ticker, "MSFT");
    }

    #[test]
    fn parses_json_object() {
        let positions = parse_positions(r#"{"AAPL": 60, "MSFT": 40}"#).unwrap();
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn parses_json_array() {
        let positions = parse_positions(r#"[{"ticker":"AAPL","allocation":60.0}]"#).unwrap();
        assert_eq!(positions[0].ticker, "AAPL");
    }

    #[test]
    fn rejects_duplicate_tickers() {
        assert!(parse_positions("AAPL=60,AAPL=40").is_err());
    }

    #[test]
    fn rejects_nonpositive_allocation() {
        assert!(parse_positions("AAPL=0").is_err());
        assert!(parse_positions("AAPL=-5").is_err());
    }

    #[test]
    fn rejects_empty_body() {
        assert!(parse_positions("").is_err());
    }

    #[test]
    fn trigger_detected_from_saito_sender() {
        assert!(is_trigger_message("@saito:example.com", "anything"));
    }

    #[test]
    fn trigger_detected_from_body_phrase() {
        assert!(is_trigger_message("@someone:example.com", "Saito scheduled trigger: portfolio analysis cycle"));
    }

    #[test]
    fn non_trigger_message_not_detected() {
        assert!(!is_trigger_message("@alice:example.com", "hello there"));
    }

    #[test]
    fn select_news_tickers_picks_material_moves() {
        let positions = vec![
            PortfolioPosition { ticker: "AAPL".into(), allocation: 60.0 },
            PortfolioPosition { ticker: "MSFT".into(), allocation: 40.0 },
        ];
        let mut changes = HashMap::new();
        changes.insert("AAPL".to_string(), 1.5);
        changes.insert("MSFT".to_string(), 0.2);
        let selected = select_news_tickers(&positions, &changes);
        assert_eq!(selected, vec!["AAPL".to_string()]);
    }

    #[test]
    fn select_news_tickers_falls_back_to_strongest_move() {
        let positions = vec![
            PortfolioPosition { ticker: "AAPL".into(), allocation: 60.0 },
            PortfolioPosition { ticker: "MSFT".into(), allocation: 40.0 },
        ];
        let mut changes = HashMap::new();
        changes.insert("AAPL".to_string(), 0.3);
        changes.insert("MSFT".to_string(), -0.6);
        let selected = select_news_tickers(&positions, &changes);
        assert_eq!(selected, vec!["MSFT".to_string()]);
    }
}
