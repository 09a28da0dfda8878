use serde_json::Value;

use crate::threading::wrap_message_id;

use super::payload::WebhookPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEventKind {
    Delivered,
    Failed { permanent: bool },
    Other(String),
}

/// Provider delivery notification for one of our outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub kind: DeliveryEventKind,
    /// Our Message-Id, wrapped in angle brackets.
    pub message_id: String,
    pub provider_event_id: Option<String>,
    pub reason: Option<String>,
}

/// Reads an event from either the JSON `event-data` envelope or legacy
/// form fields. `None` when the event names no message.
pub fn parse_delivery_event(payload: &WebhookPayload) -> Option<DeliveryEvent> {
    if let Some(raw) = payload.get("event-data") {
        if let Ok(data) = serde_json::from_str::<Value>(raw) {
            return from_event_data(&data);
        }
    }

    let event = payload.get("event")?.to_ascii_lowercase();
    let message_id = payload
        .header("Message-Id")
        .and_then(|raw| wrap_message_id(&raw))?;
    let permanent = payload
        .get("severity")
        .map(|value| !value.eq_ignore_ascii_case("temporary"))
        .unwrap_or(true);
    let reason = payload
        .first(&["reason", "description", "error"])
        .map(str::to_string);
    Some(DeliveryEvent {
        kind: event_kind(&event, permanent),
        message_id,
        provider_event_id: payload.get("id").map(str::to_string),
        reason,
    })
}

fn from_event_data(data: &Value) -> Option<DeliveryEvent> {
    let event = data.get("event")?.as_str()?.to_ascii_lowercase();
    let message_id = data
        .pointer("/message/headers/message-id")
        .and_then(Value::as_str)
        .and_then(wrap_message_id)?;
    let permanent = data
        .get("severity")
        .and_then(Value::as_str)
        .map(|value| !value.eq_ignore_ascii_case("temporary"))
        .unwrap_or(true);
    let reason = ["/delivery-status/description", "/delivery-status/message", "/reason"]
        .iter()
        .filter_map(|pointer| data.pointer(pointer).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string);
    Some(DeliveryEvent {
        kind: event_kind(&event, permanent),
        message_id,
        provider_event_id: data.get("id").and_then(Value::as_str).map(str::to_string),
        reason,
    })
}

fn event_kind(event: &str, permanent: bool) -> DeliveryEventKind {
    match event {
        "delivered" => DeliveryEventKind::Delivered,
        "failed" | "bounced" | "dropped" => DeliveryEventKind::Failed { permanent },
        other => DeliveryEventKind::Other(other.to_string()),
    }
}
