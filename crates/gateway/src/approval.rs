//! The approval gate (§4.8): the blocking human-in-the-loop step between a
//! policy `require_approval` decision and actually executing the tool call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sa_domain::{Error, Result};
use sa_store::models::{ApprovalStatus, NewApproval};
use sa_store::Store;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatTransport;

const POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct ApprovalGate {
    store: Store,
    chat: Arc<dyn ChatTransport>,
}

impl ApprovalGate {
    pub fn new(store: Store, chat: Arc<dyn ChatTransport>) -> Self {
        Self { store, chat }
    }

    /// Derive this request's approval id from the turn's trace id. Exposed
    /// so callers can reference the id (e.g. in log lines) before the
    /// blocking `request` call resolves.
    pub fn approval_id(trace_id: &str) -> String {
        format!("appr_{trace_id}")
    }

    /// Request approval and block until it is decided, denied, expired, or
    /// cancellation is signaled. `params` is rendered into the posted
    /// message so approvers can see what they are approving.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        room: &str,
        requestor: &str,
        action: &str,
        target: &str,
        params: &serde_json::Value,
        trace_id: &str,
        ttl_seconds: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let approval_id = Self::approval_id(trace_id);
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);

        self.store
            .insert_approval(NewApproval {
                approval_id: approval_id.clone(),
                trace_id: trace_id.to_string(),
                room_id: room.to_string(),
                action: action.to_string(),
                target: target.to_string(),
                params_json: params.to_string(),
                requestor: requestor.to_string(),
                expires_at: expires_at.to_rfc3339(),
            })
            .await
            .map_err(Error::from)?;

        let message = format_approval_request(&approval_id, action, target, params, requestor, &expires_at);
        if let Err(e) = self.chat.send_text(room, &message).await {
            tracing::warn!(approval_id = %approval_id, error = %e, "failed to post approval request message");
        }

        sa_domain::trace::TraceEvent::ApprovalRequested {
            approval_id: approval_id.clone(),
            mcp: action.to_string(),
            tool: target.to_string(),
        }
        .emit();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Other(format!("approval {approval_id} cancelled")));
            }

            let record = self
                .store
                .get_approval(&approval_id)
                .await
                .map_err(Error::from)?
                .ok_or_else(|| Error::Other(format!("approval {approval_id} vanished from store")))?;

            match record.status.as_str() {
                "approved" => {
                    sa_domain::trace::TraceEvent::ApprovalResolved {
                        approval_id: approval_id.clone(),
                        approved: true,
                    }
                    .emit();
                    return Ok(());
                }
                "denied" => {
                    sa_domain::trace::TraceEvent::ApprovalResolved {
                        approval_id: approval_id.clone(),
                        approved: false,
                    }
                    .emit();
                    return Err(Error::Other(format!(
                        "approval {approval_id} denied{}",
                        record
                            .decision_reason
                            .map(|r| format!(": {r}"))
                            .unwrap_or_default()
                    )));
                }
                "expired" => {
                    return Err(Error::ApprovalExpired(approval_id));
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    return Err(Error::Other(format!("approval {approval_id} cancelled")));
                }
            }
        }
    }
}

fn format_approval_request(
    approval_id: &str,
    action: &str,
    target: &str,
    params: &serde_json::Value,
    requestor: &str,
    expires_at: &chrono::DateTime<Utc>,
) -> String {
    format!(
        "🔐 Approval requested: {approval_id}\n\
         action: {action}\n\
         target: {target}\n\
         params: {params}\n\
         requested by: {requestor}\n\
         expires: {}\n\
         reply `approve {approval_id}` or `deny {approval_id} reason=\"...\"`",
        expires_at.to_rfc3339()
    )
}

/// A parsed approval decision: the approval id, whether approved, and an
/// optional reason (present only for denials, and only when supplied).
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub approval_id: String,
    pub approved: bool,
    pub reason: String,
}

/// Parse an inbound chat message as an approval decision. Returns `None`
/// when the text is not a recognized decision (the turn engine then falls
/// through to ordinary handling).
pub fn parse_decision(text: &str) -> Option<Decision> {
    let trimmed = text.trim();
    let mut tokens = trimmed.split_whitespace();
    let verb = tokens.next()?;
    let id = tokens.next()?;

    match verb {
        "approve" => Some(Decision {
            approval_id: id.to_string(),
            approved: true,
            reason: String::new(),
        }),
        "deny" => {
            let rest: String = tokens.collect::<Vec<_>>().join(" ");
            let reason = parse_reason(&rest);
            Some(Decision {
                approval_id: id.to_string(),
                approved: false,
                reason,
            })
        }
        _ => None,
    }
}

/// Extract a `reason="..."` (or unquoted `reason=value`) value from the
/// remainder of a `deny` command.
fn parse_reason(rest: &str) -> String {
    let Some(idx) = rest.find("reason=") else {
        return String::new();
    };
    let after = &rest[idx + "reason=".len()..];
    if let Some(stripped) = after.strip_prefix('"') {
        stripped.split('"').next().unwrap_or("").to_string()
    } else {
        after.split_whitespace().next().unwrap_or("").to_string()
    }
}

/// Format a decision back into the command form `parse_decision` accepts.
/// Used by tests to assert the round-trip law in §8.
pub fn format_decision(approval_id: &str, approved: bool) -> String {
    if approved {
        format!("approve {approval_id}")
    } else {
        format!("deny {approval_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve() {
        let d = parse_decision("approve appr_abc123").unwrap();
        assert_eq!(d.approval_id, "appr_abc123");
        assert!(d.approved);
    }

    #[test]
    fn parses_deny_with_quoted_reason() {
        let d = parse_decision(r#"deny appr_abc123 reason="not today""#).unwrap();
        assert_eq!(d.approval_id, "appr_abc123");
        assert!(!d.approved);
        assert_eq!(d.reason, "not today");
    }

    #[test]
    fn parses_deny_without_reason() {
        let d = parse_decision("deny appr_abc123").unwrap();
        assert_eq!(d.reason, "");
    }

    #[test]
    fn non_decision_text_returns_none() {
        assert!(parse_decision("just a regular message").is_none());
        assert!(parse_decision("").is_none());
    }

    #[test]
    fn round_trip_law_approve() {
        let formatted = format_decision("appr_xyz", true);
        let parsed = parse_decision(&formatted).unwrap();
        assert_eq!(parsed.approval_id, "appr_xyz");
        assert!(parsed.approved);
        assert_eq!(parsed.reason, "");
    }

    #[test]
    fn round_trip_law_deny() {
        let formatted = format_decision("appr_xyz", false);
        let parsed = parse_decision(&formatted).unwrap();
        assert_eq!(parsed.approval_id, "appr_xyz");
        assert!(!parsed.approved);
    }
}
