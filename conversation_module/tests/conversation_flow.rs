mod test_support;

use std::sync::{Arc, Barrier};
use std::thread;

use agent_reply_module::FALLBACK_REPLY;
use conversation_module::engine::{DeliveryOutcome, InboundOutcome};
use conversation_module::inbound::{normalize, DeliveryEvent, DeliveryEventKind, InboundEmail, WebhookPayload};
use conversation_module::models::{ConversationStatus, MessageSender, MessageStatus, NewMessage};
use conversation_module::url_triggers::{UrlTrigger, UrlTriggerConfig};

use test_support::Harness;

fn inbound(message_id: &str, text: &str, references: &str) -> InboundEmail {
    let mut pairs = vec![
        ("sender", "jane@example.com".to_string()),
        ("from", "Jane Doe <jane@example.com>".to_string()),
        ("recipient", "sarah@mg.dealer.com".to_string()),
        ("subject", "Civic availability".to_string()),
        ("body-plain", text.to_string()),
        ("Message-Id", message_id.to_string()),
    ];
    if !references.is_empty() {
        pairs.push(("References", references.to_string()));
    }
    normalize(&WebhookPayload::from_pairs(pairs)).expect("normalize")
}

#[test]
fn inbound_gets_one_threaded_reply() {
    let harness = Harness::new();
    let outcome = harness
        .engine
        .process_inbound(&inbound("<a@d>", "Is the Civic still available?", ""))
        .expect("process");

    let InboundOutcome::Replied(summary) = outcome else {
        panic!("expected a reply, got {:?}", outcome);
    };
    assert_eq!(summary.status, MessageStatus::Sent);
    assert!(!summary.handover);
    assert!(!summary.fallback);

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    let email = &sent[0];
    assert_eq!(email.in_reply_to.as_deref(), Some("<a@d>"));
    assert_eq!(email.references.as_deref(), Some("<a@d>"));
    assert_eq!(email.to, "jane@example.com");
    assert_eq!(email.from, "Sarah Lee <sarah@mg.dealer.com>");
    assert_eq!(email.subject, "Re: Civic availability");
    assert_eq!(email.message_id, summary.message_id);
    assert!(email.message_id.ends_with("@mg.dealer.com>"));

    let messages = harness
        .store
        .list_messages(&summary.conversation_id)
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, MessageSender::Lead);
    assert_eq!(messages[1].sender, MessageSender::Agent);
    assert_eq!(messages[1].status, MessageStatus::Sent);
    assert_eq!(messages[1].in_reply_to.as_deref(), Some("<a@d>"));

    let conversation = harness
        .store
        .get_conversation(&summary.conversation_id)
        .expect("lookup")
        .expect("conversation");
    assert_eq!(
        conversation.last_outbound_message_id.as_deref(),
        Some(summary.message_id.as_str())
    );

    let requests = harness.completion.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].system_prompt.contains("Riverside Motors"));
    assert_eq!(requests[0].user_text, "Is the Civic still available?");
}

#[test]
fn duplicate_message_id_is_not_processed_twice() {
    let harness = Harness::new();
    let first = harness
        .engine
        .process_inbound(&inbound("<a@d>", "Hello", ""))
        .expect("first");
    let InboundOutcome::Replied(summary) = first else {
        panic!("expected a reply");
    };

    let second = harness
        .engine
        .process_inbound(&inbound("a@d", "Hello", ""))
        .expect("second");
    assert_eq!(
        second,
        InboundOutcome::Duplicate {
            message_id: "<a@d>".to_string()
        }
    );
    assert_eq!(harness.transport.sent_count(), 1);
    assert_eq!(
        harness
            .store
            .count_messages(&summary.conversation_id)
            .expect("count"),
        2
    );
}

#[test]
fn concurrent_deliveries_of_one_message_id_reply_once() {
    let harness = Harness::new();
    let deliveries = 4;
    let start = Arc::new(Barrier::new(deliveries));
    let workers = (0..deliveries)
        .map(|_| {
            let engine = harness.engine.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                engine.process_inbound(&inbound("<race@d>", "Is the Civic still available?", ""))
            })
        })
        .collect::<Vec<_>>();
    let outcomes = workers
        .into_iter()
        .map(|worker| worker.join().expect("join").expect("process"))
        .collect::<Vec<_>>();

    let replied = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, InboundOutcome::Replied(_)))
        .count();
    assert_eq!(replied, 1);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        InboundOutcome::Replied(_) | InboundOutcome::Duplicate { .. }
    )));
    assert_eq!(harness.transport.sent_count(), 1);

    let conversation = harness
        .store
        .find_conversation("sarah", "jane@example.com")
        .expect("lookup")
        .expect("conversation");
    let lead_rows = harness
        .store
        .list_messages(&conversation.id)
        .expect("messages")
        .into_iter()
        .filter(|message| message.sender == MessageSender::Lead)
        .count();
    assert_eq!(lead_rows, 1);
}

#[test]
fn handed_over_conversation_gets_no_automated_reply() {
    let harness = Harness::new();
    harness
        .completion
        .push_reply("Let me bring in our sales manager.", true, "pricing_negotiation");

    let first = harness
        .engine
        .process_inbound(&inbound("<a@d>", "What is your best out-the-door price?", ""))
        .expect("first");
    let InboundOutcome::Replied(summary) = first else {
        panic!("expected a reply");
    };
    assert!(summary.handover);

    let conversation = harness
        .store
        .get_conversation(&summary.conversation_id)
        .expect("lookup")
        .expect("conversation");
    assert_eq!(conversation.status, ConversationStatus::HandedOver);
    assert_eq!(
        conversation.handover_reason.as_deref(),
        Some("pricing_negotiation")
    );

    let second = harness
        .engine
        .process_inbound(&inbound("<b@d>", "Hello? Anyone there?", "<a@d>"))
        .expect("second");
    assert_eq!(
        second,
        InboundOutcome::HandedOver {
            conversation_id: summary.conversation_id.clone()
        }
    );
    assert_eq!(harness.transport.sent_count(), 1);
    assert_eq!(harness.completion.requests().len(), 1);
    let messages = harness
        .store
        .list_messages(&summary.conversation_id)
        .expect("messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].message_id, "<b@d>");
}

#[test]
fn malformed_output_twice_falls_back_to_handover() {
    let harness = Harness::new();
    harness.completion.push_raw("Sure! The Civic is available.");
    harness.completion.push_raw("{\"reply\": unterminated");

    let outcome = harness
        .engine
        .process_inbound(&inbound("<a@d>", "Is the Civic available?", ""))
        .expect("process");
    let InboundOutcome::Replied(summary) = outcome else {
        panic!("expected a reply");
    };
    assert!(summary.fallback);
    assert!(summary.handover);
    assert_eq!(harness.completion.requests().len(), 2);
    assert_eq!(harness.transport.sent()[0].text_body, FALLBACK_REPLY);

    let conversation = harness
        .store
        .get_conversation(&summary.conversation_id)
        .expect("lookup")
        .expect("conversation");
    assert_eq!(conversation.status, ConversationStatus::HandedOver);
    assert_eq!(conversation.handover_reason.as_deref(), Some("malformed_output"));
}

#[test]
fn completion_error_then_valid_json_recovers() {
    let harness = Harness::new();
    harness.completion.push_error();
    harness
        .completion
        .push_reply("Yes, it is on the lot today.", false, "answered");

    let outcome = harness
        .engine
        .process_inbound(&inbound("<a@d>", "Is it on the lot?", ""))
        .expect("process");
    let InboundOutcome::Replied(summary) = outcome else {
        panic!("expected a reply");
    };
    assert!(!summary.fallback);
    assert!(!summary.handover);
    assert_eq!(
        harness.transport.sent()[0].text_body,
        "Yes, it is on the lot today."
    );
}

#[test]
fn references_are_capped_in_count_and_size() {
    let harness = Harness::new();
    let references = (0..15)
        .map(|index| format!("<{}-{}@lead-mail.example.com>", index, "x".repeat(80)))
        .collect::<Vec<_>>()
        .join(" ");

    harness
        .engine
        .process_inbound(&inbound("<a@d>", "Following up", &references))
        .expect("process");

    let sent = harness.transport.sent();
    let header = sent[0].references.clone().expect("references");
    let ids = header.split_whitespace().collect::<Vec<_>>();
    assert!(ids.len() <= 10);
    assert!(header.len() <= 900);
    assert!(ids.iter().all(|id| id.starts_with('<') && id.ends_with('>')));
    assert_eq!(ids.last().copied(), Some("<a@d>"));
}

#[test]
fn follow_up_reply_threads_previous_messages_and_history() {
    let harness = Harness::new();
    harness
        .engine
        .process_inbound(&inbound("<a@d>", "Is the Civic available?", ""))
        .expect("first");
    let first_reply = harness.transport.sent()[0].message_id.clone();

    harness
        .engine
        .process_inbound(&inbound("<b@d>", "Great, what colors?", &format!("<a@d> {}", first_reply)))
        .expect("second");

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].in_reply_to.as_deref(), Some("<b@d>"));
    let references = sent[1].references.clone().expect("references");
    assert_eq!(references, format!("<a@d> {} <b@d>", first_reply));

    let requests = harness.completion.requests();
    assert_eq!(requests.len(), 2);
    let history = &requests[1].history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "Is the Civic available?");
    assert_eq!(history[1].content, "Happy to help with that.");
}

#[test]
fn transport_failure_records_failed_message_without_rollback() {
    let harness = Harness::new();
    harness.transport.set_failing(true);

    let outcome = harness
        .engine
        .process_inbound(&inbound("<a@d>", "Hi there", ""))
        .expect("process");
    let InboundOutcome::Replied(summary) = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(summary.status, MessageStatus::Failed);

    let messages = harness
        .store
        .list_messages(&summary.conversation_id)
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(messages[1].status, MessageStatus::Failed);
    assert!(messages[1]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("mailbox unavailable")));
    let conversation = harness
        .store
        .get_conversation(&summary.conversation_id)
        .expect("lookup")
        .expect("conversation");
    assert_eq!(conversation.last_outbound_message_id, None);
    assert_eq!(conversation.status, ConversationStatus::Active);
}

#[test]
fn url_trigger_lines_are_appended_to_reply() {
    let harness = Harness::new();
    let mut triggers = UrlTriggerConfig::default();
    triggers.triggers.insert(
        "financing".to_string(),
        UrlTrigger {
            enabled: true,
            url: "https://dealer.example.com/finance".to_string(),
            message: "Get pre-approved".to_string(),
            keywords: Vec::new(),
        },
    );
    let engine = conversation_module::engine::ConversationEngine::new(
        harness.store.clone(),
        harness.transport.clone(),
        agent_reply_module::AgentCore::new(
            harness.completion.clone(),
            agent_reply_module::Sanitizer::default(),
        ),
    )
    .with_url_triggers(triggers);

    engine
        .process_inbound(&inbound("<a@d>", "Can I get financing on the Civic?", ""))
        .expect("process");
    let body = &harness.transport.sent()[0].text_body;
    assert!(body.starts_with("Happy to help with that."));
    assert!(body.contains("https://dealer.example.com/finance"));
}

#[test]
fn unknown_agent_is_not_found() {
    let harness = Harness::new();
    let payload = WebhookPayload::from_pairs(vec![
        ("sender", "jane@example.com"),
        ("recipient", "nobody@mg.dealer.com"),
        ("body-plain", "Hello"),
        ("Message-Id", "<z@d>"),
    ]);
    let err = harness
        .engine
        .process_inbound(&normalize(&payload).expect("normalize"))
        .unwrap_err();
    assert!(matches!(
        err,
        conversation_module::engine::ProcessError::NotFound(_)
    ));
    assert_eq!(harness.transport.sent_count(), 0);
}

#[test]
fn delivery_events_move_pending_rows_once() {
    let harness = Harness::new();
    let conversation = harness
        .store
        .get_or_create_conversation("sarah", "jane@example.com", "Spring event")
        .expect("conversation");
    for message_id in ["<p1@mg.dealer.com>", "<p2@mg.dealer.com>"] {
        harness
            .store
            .insert_message(&NewMessage {
                conversation_id: conversation.id.clone(),
                sender: MessageSender::Agent,
                subject: "Spring event".to_string(),
                content: "Hi".to_string(),
                status: MessageStatus::Pending,
                message_id: message_id.to_string(),
                in_reply_to: None,
                references: None,
            })
            .expect("insert")
            .expect("row");
    }

    let delivered = DeliveryEvent {
        kind: DeliveryEventKind::Delivered,
        message_id: "<p1@mg.dealer.com>".to_string(),
        provider_event_id: Some("evt-1".to_string()),
        reason: None,
    };
    assert_eq!(
        harness.engine.record_delivery_event(&delivered).expect("event"),
        DeliveryOutcome::Updated(MessageStatus::Sent)
    );
    assert_eq!(
        harness.engine.record_delivery_event(&delivered).expect("replay"),
        DeliveryOutcome::Ignored
    );

    let temporary = DeliveryEvent {
        kind: DeliveryEventKind::Failed { permanent: false },
        message_id: "<p2@mg.dealer.com>".to_string(),
        provider_event_id: None,
        reason: Some("mailbox full".to_string()),
    };
    assert_eq!(
        harness.engine.record_delivery_event(&temporary).expect("temporary"),
        DeliveryOutcome::Ignored
    );
    let permanent = DeliveryEvent {
        kind: DeliveryEventKind::Failed { permanent: true },
        ..temporary
    };
    assert_eq!(
        harness.engine.record_delivery_event(&permanent).expect("permanent"),
        DeliveryOutcome::Updated(MessageStatus::Failed)
    );
    let failed = harness
        .store
        .get_message_by_message_id("<p2@mg.dealer.com>")
        .expect("lookup")
        .expect("message");
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("mailbox full"));

    let unknown = DeliveryEvent {
        message_id: "<missing@mg.dealer.com>".to_string(),
        ..delivered
    };
    assert_eq!(
        harness.engine.record_delivery_event(&unknown).expect("unknown"),
        DeliveryOutcome::UnknownMessage
    );
}
