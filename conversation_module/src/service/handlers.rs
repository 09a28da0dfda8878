use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::campaign::SchedulerError;
use crate::engine::{DeliveryOutcome, InboundOutcome, ProcessError};
use crate::inbound::{normalize, parse_delivery_event, WebhookPayload};
use crate::signature::{secrets_match, verify_signature};
use crate::store::StoreError;

use super::config::ServiceConfig;
use super::state::AppState;

type JsonResponse = (StatusCode, Json<Value>);

/// Verifies, normalizes and processes one inbound webhook payload.
/// Blocking: call from a blocking task.
pub fn handle_inbound_payload(
    state: &AppState,
    payload: &WebhookPayload,
    now_unix: i64,
) -> (StatusCode, Value) {
    if let Err(rejected) = check_signature(&state.config, payload, now_unix) {
        return rejected;
    }
    let inbound = match normalize(payload) {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!("inbound payload rejected: {}", err);
            return (StatusCode::BAD_REQUEST, json!({ "status": err.reason() }));
        }
    };

    match state.engine.process_inbound(&inbound) {
        Ok(InboundOutcome::Replied(summary)) => (
            StatusCode::OK,
            json!({
                "status": "replied",
                "conversation_id": summary.conversation_id,
                "message_id": summary.message_id,
                "delivery": summary.status,
                "handover": summary.handover,
                "fallback": summary.fallback,
            }),
        ),
        Ok(InboundOutcome::Duplicate { message_id }) => (
            StatusCode::OK,
            json!({ "status": "duplicate", "message_id": message_id }),
        ),
        Ok(InboundOutcome::HandedOver { conversation_id }) => (
            StatusCode::OK,
            json!({ "status": "handed_over", "conversation_id": conversation_id }),
        ),
        Err(ProcessError::NotFound(recipient)) => {
            warn!("inbound for unknown agent {}", recipient);
            (StatusCode::NOT_FOUND, json!({ "status": "unknown_agent" }))
        }
        Err(ProcessError::Store(err)) => {
            error!("inbound processing failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": "store_error" }),
            )
        }
    }
}

/// Verifies and applies one delivery event payload. Blocking.
pub fn handle_event_payload(
    state: &AppState,
    payload: &WebhookPayload,
    now_unix: i64,
) -> (StatusCode, Value) {
    if let Err(rejected) = check_signature(&state.config, payload, now_unix) {
        return rejected;
    }
    let Some(event) = parse_delivery_event(payload) else {
        return (StatusCode::BAD_REQUEST, json!({ "status": "invalid_event" }));
    };
    match state.engine.record_delivery_event(&event) {
        Ok(DeliveryOutcome::Updated(status)) => (
            StatusCode::OK,
            json!({ "status": "updated", "message_status": status }),
        ),
        Ok(DeliveryOutcome::Ignored) => (StatusCode::OK, json!({ "status": "ignored" })),
        // Acknowledged so the provider stops retrying.
        Ok(DeliveryOutcome::UnknownMessage) => {
            (StatusCode::OK, json!({ "status": "unknown_message" }))
        }
        Err(err) => {
            error!("delivery event failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "status": "store_error" }),
            )
        }
    }
}

fn check_signature(
    config: &ServiceConfig,
    payload: &WebhookPayload,
    now_unix: i64,
) -> Result<(), (StatusCode, Value)> {
    if config.signature_disabled {
        return Ok(());
    }
    let Some(key) = config.webhook_signing_key.as_deref() else {
        return Err((
            StatusCode::UNAUTHORIZED,
            json!({ "status": "signing_key_missing" }),
        ));
    };
    verify_signature(
        key,
        payload.timestamp(),
        payload.token(),
        payload.signature(),
        now_unix,
    )
    .map_err(|err| {
        warn!("webhook signature rejected: {}", err);
        (StatusCode::UNAUTHORIZED, json!({ "status": err.reason() }))
    })
}

pub(super) async fn inbound_webhook(
    State(state): State<AppState>,
    request: Request,
) -> impl IntoResponse {
    let payload = match read_payload(&state, request).await {
        Ok(payload) => payload,
        Err(rejected) => return rejected,
    };
    let now = Utc::now().timestamp();
    match task::spawn_blocking(move || handle_inbound_payload(&state, &payload, now)).await {
        Ok((status, body)) => (status, Json(body)),
        Err(err) => {
            error!("inbound task panicked: {}", err);
            internal_error()
        }
    }
}

pub(super) async fn events_webhook(
    State(state): State<AppState>,
    request: Request,
) -> impl IntoResponse {
    let payload = match read_payload(&state, request).await {
        Ok(payload) => payload,
        Err(rejected) => return rejected,
    };
    let now = Utc::now().timestamp();
    match task::spawn_blocking(move || handle_event_payload(&state, &payload, now)).await {
        Ok((status, body)) => (status, Json(body)),
        Err(err) => {
            error!("event task panicked: {}", err);
            internal_error()
        }
    }
}

pub(super) async fn scheduler_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(rejected) = authorize(&state.config, &headers) {
        return rejected;
    }
    let scheduler = state.scheduler.clone();
    match task::spawn_blocking(move || scheduler.run_now()).await {
        Ok(Ok(report)) => {
            info!("manual campaign run: {}", report.message);
            (StatusCode::OK, Json(json!(report)))
        }
        Ok(Err(SchedulerError::Overlap)) => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "message": SchedulerError::Overlap.to_string(),
            })),
        ),
        Ok(Err(err)) => {
            error!("manual campaign run failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": err.to_string() })),
            )
        }
        Err(err) => {
            error!("campaign run task panicked: {}", err);
            internal_error()
        }
    }
}

pub(super) async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!(state.scheduler.status())))
}

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn health_domains(State(state): State<AppState>) -> impl IntoResponse {
    match task::spawn_blocking(move || domain_report(&state)).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)),
        Ok(Err(err)) => {
            error!("domain health check failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "store_error" })),
            )
        }
        Err(err) => {
            error!("domain health task panicked: {}", err);
            internal_error()
        }
    }
}

/// Compares configured sending domains with those active campaigns use.
pub fn domain_report(state: &AppState) -> Result<Value, StoreError> {
    let store = state.store();
    let campaign_domains = store.active_campaign_domains()?;
    let counts = store.outreach_counts()?;
    let allowed = &state.config.allowed_sending_domains;
    let missing = campaign_domains
        .iter()
        .filter(|domain| !allowed.contains(&domain.to_ascii_lowercase()))
        .cloned()
        .collect::<Vec<_>>();
    Ok(json!({
        "status": if missing.is_empty() { "ok" } else { "missing_domains" },
        "allowed_domains": allowed,
        "campaign_domains": campaign_domains,
        "missing_domains": missing,
        "active_campaigns": counts.active_campaigns,
        "active_leads": counts.active_leads,
        "leads_due_immediately": counts.leads_due_immediately,
    }))
}

fn authorize(config: &ServiceConfig, headers: &HeaderMap) -> Result<(), JsonResponse> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if provided.is_some_and(|provided| secrets_match(expected, provided)) {
        Ok(())
    } else {
        warn!("scheduler trigger rejected: bad admin token");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "unauthorized" })),
        ))
    }
}

/// Reads a webhook body as multipart, JSON or urlencoded form.
async fn read_payload(state: &AppState, request: Request) -> Result<WebhookPayload, JsonResponse> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|err| {
                warn!("invalid multipart webhook: {}", err);
                bad_request("invalid_multipart")
            })?;
        let mut pairs = Vec::new();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(err) => {
                    warn!("multipart webhook truncated: {}", err);
                    return Err(bad_request("invalid_multipart"));
                }
            };
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                debug!("skipping attachment part {}", name);
                continue;
            }
            let value = field.text().await.map_err(|err| {
                warn!("unreadable multipart field {}: {}", name, err);
                bad_request("invalid_multipart")
            })?;
            pairs.push((name, value));
        }
        return Ok(WebhookPayload::from_pairs(pairs));
    }

    let body = Bytes::from_request(request, state)
        .await
        .map_err(|rejection| {
            warn!("unreadable webhook body: {}", rejection);
            (
                rejection.status(),
                Json(json!({ "status": "unreadable_body" })),
            )
        })?;
    let looks_like_json = content_type.contains("json")
        || body
            .iter()
            .find(|byte| !byte.is_ascii_whitespace())
            .is_some_and(|byte| *byte == b'{');
    let parsed = if looks_like_json {
        WebhookPayload::from_json(&body)
    } else {
        WebhookPayload::from_form(&body)
    };
    parsed.map_err(|err| {
        warn!("webhook payload rejected: {}", err);
        bad_request("invalid_payload")
    })
}

fn bad_request(reason: &str) -> JsonResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "status": reason })))
}

fn internal_error() -> JsonResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "internal_error" })),
    )
}
