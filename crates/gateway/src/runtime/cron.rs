//! Timezone-aware cron evaluator and scheduler for the built-in `cron`
//! gateway kind. A gateway spec with `type: cron` is never spawned as a
//! subprocess — `builtin_config` carries a 5-field cron expression (and
//! optional timezone) that this module evaluates once a minute, firing a
//! synthetic `cron.tick` event through the same ingress path an external
//! gateway's `POST /events/<source>` would use.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;

use crate::state::AppState;
use crate::turn::engine::{handle_gateway_event, GatewayEventPayload};

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Check if a UTC instant matches a 5-field cron expression evaluated in
/// the given timezone.
pub fn cron_matches_tz(cron: &str, at: &DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
    cron_matches_naive(cron, &at.with_timezone(&tz).naive_local())
}

#[derive(Debug, Clone, Deserialize)]
struct CronBuiltinConfig {
    cron: String,
    #[serde(default = "default_tz")]
    tz: String,
}

fn default_tz() -> String {
    "UTC".into()
}

/// Spawn the cron scheduler: ticks once a minute, re-reads the active
/// config's built-in `cron` gateways, and fires `cron.tick` for every one
/// whose expression matches the current minute. A name fires at most once
/// per matching minute even if the tick is briefly delayed.
pub fn spawn_scheduler(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        let mut fired_this_minute: HashSet<(String, i64)> = HashSet::new();

        loop {
            interval.tick().await;
            let now = Utc::now();
            let minute_key = now.timestamp() / 60;
            fired_this_minute.retain(|(_, m)| *m == minute_key);

            let Some(config) = state.config() else {
                continue;
            };

            for gateway in &config.gateways.gateways {
                if gateway.kind != Some(sa_domain::config::BuiltinGatewayKind::Cron) {
                    continue;
                }
                let Ok(cron_cfg) = serde_json::from_value::<CronBuiltinConfig>(gateway.builtin_config.clone()) else {
                    tracing::warn!(gateway = %gateway.name, "cron gateway: missing or malformed builtin_config.cron");
                    continue;
                };
                let key = (gateway.name.clone(), minute_key);
                if fired_this_minute.contains(&key) {
                    continue;
                }
                if cron_matches_tz(&cron_cfg.cron, &now, parse_tz(&cron_cfg.tz)) {
                    fired_this_minute.insert(key);
                    let state = state.clone();
                    let source = gateway.name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_gateway_event(&state, &source, "cron.tick", GatewayEventPayload::default()).await {
                            tracing::warn!(gateway = %source, error = %e, "cron scheduler: event handling failed");
                        }
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_every_minute() {
        let at = Utc::now();
        assert!(cron_matches_tz("* * * * *", &at, chrono_tz::UTC));
    }

    #[test]
    fn step_field_matches_multiples() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:10:00Z").unwrap().with_timezone(&Utc);
        assert!(cron_matches_tz("*/5 * * * *", &at, chrono_tz::UTC));
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:12:00Z").unwrap().with_timezone(&Utc);
        assert!(!cron_matches_tz("*/5 * * * *", &at, chrono_tz::UTC));
    }

    #[test]
    fn range_field_matches() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z").unwrap().with_timezone(&Utc);
        assert!(cron_matches_tz("0 9-17 * * *", &at, chrono_tz::UTC));
        let at = DateTime::parse_from_rfc3339("2026-01-01T20:00:00Z").unwrap().with_timezone(&Utc);
        assert!(!cron_matches_tz("0 9-17 * * *", &at, chrono_tz::UTC));
    }
}
