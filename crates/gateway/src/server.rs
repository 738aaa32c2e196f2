//! Control/event ingress server (§4.9): a headless axum router exposing
//! health/status, config apply, secret redemption, task control, and
//! gateway event ingress. No dashboard, no static-file serving — this is a
//! control plane only.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};

use sa_domain::config::{BuiltinGatewayKind, CorsConfig};

use crate::state::AppState;
use crate::turn::engine::{handle_gateway_event, GatewayEventPayload};

type HmacSha256 = Hmac<Sha256>;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn api_ok(value: serde_json::Value) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

/// Build the router. `state` is shared across every handler via axum's
/// `State` extractor.
pub fn router(state: Arc<AppState>) -> Router {
    let server_config = state.config().map(|c| c.server).unwrap_or_default();
    let cors = build_cors_layer(&server_config.cors);

    let protected = Router::new()
        .route("/status", get(status))
        .route("/config/apply", post(config_apply))
        .route("/secrets/token", post(secrets_token))
        .route("/secrets/apply", post(secrets_apply))
        .route("/tasks/cancel", post(tasks_cancel))
        .route("/tasks/restart", post(tasks_restart))
        .route("/events/:source", post(events_ingress))
        .route("/secret/:name", get(secret_get))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_token));

    let router = Router::new().route("/health", get(health)).merge(protected).layer(cors);

    match build_governor_layer(&server_config.rate_limit) {
        Some(governor) => router.layer(governor).with_state(state),
        None => router.with_state(state),
    }
}

/// Per-IP token-bucket rate limiting, enabled only when `server.rate_limit`
/// is configured.
fn build_governor_layer(rate_limit: &Option<sa_domain::config::RateLimitConfig>) -> Option<tower_governor::GovernorLayer> {
    use tower_governor::governor::GovernorConfigBuilder;
    use tower_governor::GovernorLayer;

    let rl = rate_limit.as_ref()?;
    let gov_config = GovernorConfigBuilder::default()
        .per_second(rl.requests_per_second)
        .burst_size(rl.burst_size)
        .finish()
        .expect("rate_limit: requests_per_second and burst_size must be > 0");

    tracing::info!(
        requests_per_second = rl.requests_per_second,
        burst_size = rl.burst_size,
        "per-IP rate limiting enabled"
    );

    Some(GovernorLayer {
        config: Arc::new(gov_config),
    })
}

async fn require_api_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let Some(expected) = state.api_token.as_ref().filter(|t| !t.is_empty()) else {
        return next.run(request).await;
    };

    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing bearer token");
    }
    next.run(request).await
}

// ── GET /health, /status ─────────────────────────────────────────────

async fn health() -> Response {
    api_ok(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("SA_GIT_COMMIT").unwrap_or("unknown"),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.status().await;
    api_ok(serde_json::json!({
        "agent_id": snapshot.agent_id,
        "version": snapshot.version,
        "started_at": snapshot.started_at,
        "uptime_seconds": snapshot.uptime_seconds,
        "config_hash": snapshot.config_hash,
        "mcp_servers": snapshot.mcp_names,
        "gateways": snapshot.gateway_names,
        "messages_outbound": snapshot.messages_outbound,
    }))
}

// ── POST /config/apply ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConfigApplyRequest {
    yaml: String,
    #[serde(default)]
    hash: Option<String>,
}

async fn config_apply(State(state): State<Arc<AppState>>, Json(body): Json<ConfigApplyRequest>) -> Response {
    let hash = match state.config_loader.apply(body.yaml.as_bytes()) {
        Ok(hash) => hash,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    if let Some(expected) = &body.hash {
        if expected != &hash {
            return api_error(StatusCode::CONFLICT, format!("applied config hash {hash} does not match expected {expected}"));
        }
    }

    if let Err(e) = state.store.upsert_applied_config(hash.clone(), body.yaml).await {
        tracing::warn!(error = %e, "config/apply: failed to persist applied config");
    }

    state.reconcile().await;
    tracing::info!(hash = %hash, "config applied");
    api_ok(serde_json::json!({"hash": hash}))
}

// ── POST /secrets/token (preferred) ──────────────────────────────────

#[derive(Debug, Deserialize)]
struct SecretTokenEntry {
    #[serde(rename = "ref")]
    secret_ref: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SecretsTokenRequest {
    tokens: Vec<SecretTokenEntry>,
}

#[derive(Debug, Deserialize)]
struct IssuerResponse {
    value: String,
    #[serde(default = "default_ttl_seconds")]
    ttl_seconds: u64,
}

fn default_ttl_seconds() -> u64 {
    3600
}

async fn secrets_token(State(state): State<Arc<AppState>>, Json(body): Json<SecretsTokenRequest>) -> Response {
    let Some(config) = state.config() else {
        return api_error(StatusCode::CONFLICT, "no active config");
    };
    let Some(issuer_url) = config.secrets.issuer_url.clone() else {
        return api_error(StatusCode::CONFLICT, "no secrets.issuer_url configured");
    };

    let client = reqwest::Client::new();
    let mut results = serde_json::Map::new();

    for entry in body.tokens {
        let redeemed = client
            .post(format!("{}/redeem", issuer_url.trim_end_matches('/')))
            .json(&serde_json::json!({"ref": entry.secret_ref, "token": entry.token}))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        let redeemed = match redeemed {
            Ok(resp) => resp.json::<IssuerResponse>().await,
            Err(e) => {
                tracing::warn!(secret_ref = %entry.secret_ref, error = %e, "secrets/token: redemption request failed");
                results.insert(entry.secret_ref, serde_json::json!({"status": "error", "message": e.to_string()}));
                continue;
            }
        };

        match redeemed {
            Ok(issued) => {
                let value = match base64_decode(&issued.value) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        results.insert(entry.secret_ref, serde_json::json!({"status": "error", "message": e}));
                        continue;
                    }
                };
                state.secret_cache.set(entry.secret_ref.clone(), value, issued.ttl_seconds);
                results.insert(entry.secret_ref, serde_json::json!({"status": "ok"}));
            }
            Err(e) => {
                results.insert(entry.secret_ref, serde_json::json!({"status": "error", "message": e.to_string()}));
            }
        }
    }

    state.apply_secret_env().await;
    state.rebuild_provider(&config).await;

    api_ok(serde_json::Value::Object(results))
}

// ── POST /secrets/apply (legacy) ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SecretsApplyRequest {
    secrets: std::collections::HashMap<String, String>,
    #[serde(default = "default_ttl_seconds")]
    ttl: u64,
}

async fn secrets_apply(State(state): State<Arc<AppState>>, Json(body): Json<SecretsApplyRequest>) -> Response {
    if !state.allow_legacy_secrets_apply {
        return api_error(StatusCode::FORBIDDEN, "POST /secrets/apply is disabled (server.allow_legacy_secrets_apply=false)");
    }
    let Some(config) = state.config() else {
        return api_error(StatusCode::CONFLICT, "no active config");
    };

    let mut decoded = std::collections::HashMap::new();
    for (name, b64) in body.secrets {
        match base64_decode(&b64) {
            Ok(bytes) => {
                decoded.insert(name, bytes);
            }
            Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("secret \"{name}\": {e}")),
        }
    }

    state.secret_cache.apply(decoded, body.ttl);
    state.apply_secret_env().await;
    state.rebuild_provider(&config).await;
    tracing::info!("legacy secrets applied");
    api_ok(serde_json::json!({"status": "ok"}))
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|e| e.to_string())
}

// ── POST /tasks/cancel, /tasks/restart ───────────────────────────────

async fn tasks_cancel(State(state): State<Arc<AppState>>) -> Response {
    state.cancel_all_turns().await;
    api_ok(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct TasksRestartRequest {
    name: String,
}

async fn tasks_restart(State(state): State<Arc<AppState>>, Json(body): Json<TasksRestartRequest>) -> Response {
    match state.restart_process(&body.name).await {
        Ok(()) => api_ok(serde_json::json!({"status": "ok"})),
        Err(e) => api_error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

// ── POST /events/<source> ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: EventPayloadBody,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayloadBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// `builtin_config` shape for a `kind: webhook` gateway: the name of a
/// secret-cache entry holding the HMAC key, and the header carrying the
/// signature (GitHub-style `sha256=<hex>` by default).
#[derive(Debug, Deserialize)]
struct WebhookBuiltinConfig {
    secret_ref: String,
    #[serde(default = "default_signature_header")]
    signature_header: String,
}

fn default_signature_header() -> String {
    "x-hub-signature-256".into()
}

async fn events_ingress(State(state): State<Arc<AppState>>, Path(source): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(config) = state.config() {
        if let Some(gateway) = config.gateways.gateways.iter().find(|g| g.name == source) {
            if gateway.kind == Some(BuiltinGatewayKind::Webhook) {
                if let Err(resp) = verify_webhook_signature(&state, gateway, &headers, &body).await {
                    return resp;
                }
            }
        }
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("malformed event envelope: {e}")),
    };

    let state_for_turn = state.clone();
    let source_for_turn = source.clone();
    tokio::spawn(async move {
        let payload = GatewayEventPayload {
            message: envelope.payload.message,
            data: envelope.payload.data,
        };
        if let Err(e) = handle_gateway_event(&state_for_turn, &source_for_turn, &envelope.event_type, payload).await {
            tracing::warn!(source = %source_for_turn, error = %e, "event ingress: turn handling failed");
        }
    });

    (StatusCode::ACCEPTED, Json(serde_json::json!({"status": "accepted", "source": source}))).into_response()
}

async fn verify_webhook_signature(
    state: &AppState,
    gateway: &sa_domain::config::GatewaySpec,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), Response> {
    let webhook_cfg: WebhookBuiltinConfig = serde_json::from_value(gateway.builtin_config.clone())
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("webhook gateway \"{}\": bad builtin_config: {e}", gateway.name)))?;

    let secret = state
        .secret_cache
        .get(&webhook_cfg.secret_ref)
        .map_err(|_| api_error(StatusCode::CONFLICT, format!("webhook gateway \"{}\": signing secret not available", gateway.name)))?;

    let sig_header = headers
        .get(webhook_cfg.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let sig_hex = sig_header.strip_prefix("sha256=").unwrap_or(sig_header);

    let mut mac = HmacSha256::new_from_slice(&secret).expect("HMAC accepts any key length");
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() != 1 {
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature"));
    }
    Ok(())
}

// ── GET /secret/<ref> ─────────────────────────────────────────────────
// Used by the built-in webhook gateway path above, and available directly
// for operator tooling that needs to confirm a secret ref resolved.

async fn secret_get(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    use base64::Engine;
    match state.secret_cache.get(&name) {
        Ok(value) => api_ok(serde_json::json!({"value": base64::engine::general_purpose::STANDARD.encode(value)})),
        Err(_) => api_error(StatusCode::NOT_FOUND, format!("secret \"{name}\" not found or expired")),
    }
}

// ── CORS ──────────────────────────────────────────────────────────────

/// Build a permissive-but-scoped [`CorsLayer`] from the configured allowed
/// origins. A trailing `:*` wildcard matches any numeric port on that host.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::MockTransport;
    use crate::config_loader::ConfigLoader;
    use crate::tools::ToolRegistry;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let store = sa_store::Store::open_in_memory().await.unwrap();
        let state = AppState::new(
            "test-agent".into(),
            "http://127.0.0.1:3210".into(),
            Arc::new(ConfigLoader::new()),
            store,
            Arc::new(MockTransport::new()),
            Arc::new(ToolRegistry::new()),
            None,
            false,
        );
        Arc::new(state)
    }

    #[tokio::test]
    async fn health_is_always_reachable() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_requires_no_token_when_unset() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/status").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_rejects_missing_token_when_configured() {
        let store = sa_store::Store::open_in_memory().await.unwrap();
        let state = Arc::new(AppState::new(
            "test-agent".into(),
            "http://127.0.0.1:3210".into(),
            Arc::new(ConfigLoader::new()),
            store,
            Arc::new(MockTransport::new()),
            Arc::new(ToolRegistry::new()),
            Some("secret-token".into()),
            false,
        ));
        let app = router(state);
        let response = app
            .oneshot(Request::builder().uri("/status").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn secrets_apply_is_disabled_by_default() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/secrets/apply")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"secrets":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
