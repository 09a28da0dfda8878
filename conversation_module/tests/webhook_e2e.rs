mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use conversation_module::campaign::CampaignScheduler;
use conversation_module::inbound::WebhookPayload;
use conversation_module::models::{MessageSender, MessageStatus, NewMessage};
use conversation_module::service::{
    domain_report, handle_event_payload, handle_inbound_payload, AppState, ServiceConfig,
    DEFAULT_INBOUND_BODY_MAX_BYTES,
};
use conversation_module::signature::compute_signature;
use serde_json::json;

use test_support::{seed_campaign, Harness};

const SIGNING_KEY: &str = "key-webhook-test";

fn config(harness: &Harness, signature_disabled: bool) -> ServiceConfig {
    ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: harness.store.path().to_path_buf(),
        directory_path: None::<PathBuf>,
        webhook_signing_key: (!signature_disabled).then(|| SIGNING_KEY.to_string()),
        signature_disabled,
        allowed_sending_domains: vec!["mg.dealer.com".to_string()],
        admin_token: None,
        scheduler_enabled: false,
        scheduler_cron: "0 0 14 * * *".to_string(),
        history_limit: 20,
        inbound_body_max_bytes: DEFAULT_INBOUND_BODY_MAX_BYTES,
    }
}

fn app_state(harness: &Harness, signature_disabled: bool) -> AppState {
    AppState::new(
        Arc::new(config(harness, signature_disabled)),
        harness.engine.clone(),
        Arc::new(CampaignScheduler::new(
            harness.store.clone(),
            harness.transport.clone(),
        )),
    )
}

fn signed_fields(now: i64) -> Vec<(String, String)> {
    let timestamp = now.to_string();
    let token = "d1f0c2a9e8b7".to_string();
    let signature = compute_signature(SIGNING_KEY, &timestamp, &token).expect("sign");
    vec![
        ("timestamp".to_string(), timestamp),
        ("token".to_string(), token),
        ("signature".to_string(), signature),
    ]
}

fn inbound_fields(now: i64, recipient: &str, message_id: &str) -> Vec<(String, String)> {
    let mut fields = signed_fields(now);
    fields.extend(
        [
            ("sender", "jane@example.com"),
            ("from", "Jane Doe <jane@example.com>"),
            ("recipient", recipient),
            ("subject", "Civic availability"),
            ("body-plain", "Is the Civic still available?"),
            ("Message-Id", message_id),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string())),
    );
    fields
}

fn inbound_payload(now: i64, recipient: &str, message_id: &str) -> WebhookPayload {
    WebhookPayload::from_pairs(inbound_fields(now, recipient, message_id))
}

#[test]
fn bad_signature_is_rejected_before_persistence() {
    let harness = Harness::new();
    let state = app_state(&harness, false);
    let now = Utc::now().timestamp();
    let mut fields = inbound_fields(now, "sarah@mg.dealer.com", "<a@d>");
    for (key, value) in fields.iter_mut() {
        if key == "signature" {
            *value = "00".repeat(32);
        }
    }
    let payload = WebhookPayload::from_pairs(fields);

    let (status, body) = handle_inbound_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "invalid_signature");
    assert!(harness
        .store
        .find_conversation("sarah", "jane@example.com")
        .expect("lookup")
        .is_none());
    assert_eq!(harness.transport.sent_count(), 0);
}

#[test]
fn stale_or_unsigned_payloads_are_rejected() {
    let harness = Harness::new();
    let state = app_state(&harness, false);
    let now = Utc::now().timestamp();

    let stale = inbound_payload(now - 3_600, "sarah@mg.dealer.com", "<a@d>");
    let (status, body) = handle_inbound_payload(&state, &stale, now);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "stale_timestamp");

    let unsigned = WebhookPayload::from_pairs(vec![
        ("sender", "jane@example.com"),
        ("recipient", "sarah@mg.dealer.com"),
    ]);
    let (status, body) = handle_inbound_payload(&state, &unsigned, now);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "missing_timestamp");
    assert_eq!(harness.transport.sent_count(), 0);
}

#[test]
fn signed_inbound_is_replied_then_duplicate() {
    let harness = Harness::new();
    let state = app_state(&harness, false);
    let now = Utc::now().timestamp();
    let payload = inbound_payload(now, "sarah@mg.dealer.com", "<a@d>");

    let (status, body) = handle_inbound_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "replied");
    assert_eq!(body["delivery"], "sent");
    assert_eq!(body["handover"], false);

    let (status, body) = handle_inbound_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(body["message_id"], "<a@d>");
    assert_eq!(harness.transport.sent_count(), 1);
}

#[test]
fn unknown_agent_and_missing_sender_map_to_client_errors() {
    let harness = Harness::new();
    let state = app_state(&harness, false);
    let now = Utc::now().timestamp();

    let payload = inbound_payload(now, "ghost@mg.dealer.com", "<a@d>");
    let (status, body) = handle_inbound_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "unknown_agent");

    let mut fields = signed_fields(now);
    fields.push(("recipient".to_string(), "sarah@mg.dealer.com".to_string()));
    fields.push(("body-plain".to_string(), "Hello".to_string()));
    let (status, body) =
        handle_inbound_payload(&state, &WebhookPayload::from_pairs(fields), now);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "missing_sender");
    assert_eq!(harness.transport.sent_count(), 0);
}

#[test]
fn disabled_signature_accepts_json_payload() {
    let harness = Harness::new();
    let state = app_state(&harness, true);
    let body = json!({
        "sender": "jane@example.com",
        "recipient": "sarah@mg.dealer.com",
        "subject": "Trade-in",
        "stripped-text": "What could I get for my 2018 Accord?",
        "message-headers": [["Message-Id", "<json-1@example.com>"]],
    });
    let payload = WebhookPayload::from_json(body.to_string().as_bytes()).expect("json");

    let (status, body) = handle_inbound_payload(&state, &payload, Utc::now().timestamp());
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "replied");
    assert_eq!(
        harness.transport.sent()[0].in_reply_to.as_deref(),
        Some("<json-1@example.com>")
    );
}

#[test]
fn signed_delivery_event_updates_pending_message() {
    let harness = Harness::new();
    let state = app_state(&harness, false);
    let conversation = harness
        .store
        .get_or_create_conversation("sarah", "jane@example.com", "Spring event")
        .expect("conversation");
    harness
        .store
        .insert_message(&NewMessage {
            conversation_id: conversation.id.clone(),
            sender: MessageSender::Agent,
            subject: "Spring event".to_string(),
            content: "Hi".to_string(),
            status: MessageStatus::Pending,
            message_id: "<p1@mg.dealer.com>".to_string(),
            in_reply_to: None,
            references: None,
        })
        .expect("insert")
        .expect("row");

    let now = Utc::now().timestamp();
    let timestamp = now.to_string();
    let signature = compute_signature(SIGNING_KEY, &timestamp, "tok-1").expect("sign");
    let body = json!({
        "signature": {"timestamp": timestamp, "token": "tok-1", "signature": signature},
        "event-data": {
            "id": "evt-1",
            "event": "failed",
            "severity": "permanent",
            "message": {"headers": {"message-id": "p1@mg.dealer.com"}},
            "delivery-status": {"description": "No such mailbox"},
        },
    });
    let payload = WebhookPayload::from_json(body.to_string().as_bytes()).expect("json");

    let (status, response) = handle_event_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "updated");
    assert_eq!(response["message_status"], "failed");
    let message = harness
        .store
        .get_message_by_message_id("<p1@mg.dealer.com>")
        .expect("lookup")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.error.as_deref(), Some("No such mailbox"));

    let (status, response) = handle_event_payload(&state, &payload, now);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ignored");
}

#[test]
fn domain_report_lists_missing_sending_domains() {
    let harness = Harness::new();
    seed_campaign(&harness.store, &[0, 2], &["jane@example.com", "bob@example.com"], Utc::now());

    let state = app_state(&harness, true);
    let report = domain_report(&state).expect("report");
    assert_eq!(report["status"], "ok");
    assert_eq!(report["active_campaigns"], 1);
    assert_eq!(report["active_leads"], 2);
    assert_eq!(report["leads_due_immediately"], 2);

    let mut config = config(&harness, true);
    config.allowed_sending_domains = vec!["mg.other.com".to_string()];
    let state = AppState::new(Arc::new(config), state.engine.clone(), state.scheduler.clone());
    let report = domain_report(&state).expect("report");
    assert_eq!(report["status"], "missing_domains");
    assert_eq!(report["missing_domains"], json!(["mg.dealer.com"]));
}
