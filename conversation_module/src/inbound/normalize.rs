use serde::Serialize;
use tracing::info;

use crate::html::html_to_text;
use crate::models::{extract_display_name, extract_first_email};
use crate::threading::{parse_reference_list, wrap_message_id};

use super::payload::WebhookPayload;

/// Canonical inbound email, independent of how the provider encoded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundEmail {
    pub sender: String,
    pub sender_name: Option<String>,
    pub recipient_local_part: String,
    pub recipient_domain: String,
    pub subject: String,
    pub body_plain: String,
    pub body_html: Option<String>,
    pub stripped_text: Option<String>,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub message_id_synthesized: bool,
}

impl InboundEmail {
    pub fn recipient(&self) -> String {
        format!("{}@{}", self.recipient_local_part, self.recipient_domain)
    }

    /// What the lead actually wrote: the reply without quoted history when
    /// the provider stripped it, else the full plain body.
    pub fn lead_text(&self) -> &str {
        self.stripped_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&self.body_plain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("inbound payload has no sender address")]
    MissingSender,
    #[error("inbound payload has no recipient address")]
    MissingRecipient,
}

impl NormalizeError {
    pub fn reason(&self) -> &'static str {
        match self {
            NormalizeError::MissingSender => "missing_sender",
            NormalizeError::MissingRecipient => "missing_recipient",
        }
    }
}

pub fn normalize(payload: &WebhookPayload) -> Result<InboundEmail, NormalizeError> {
    let sender = payload
        .first(&["sender", "from"])
        .and_then(extract_first_email)
        .or_else(|| payload.get("from").and_then(extract_first_email))
        .ok_or(NormalizeError::MissingSender)?;
    let sender_name = payload.get("from").and_then(extract_display_name);

    let recipient = payload
        .first(&["recipient", "to"])
        .and_then(extract_first_email)
        .or_else(|| payload.header("To").as_deref().and_then(extract_first_email))
        .ok_or(NormalizeError::MissingRecipient)?;
    let (recipient_local_part, recipient_domain) = recipient
        .rsplit_once('@')
        .map(|(local, domain)| (local.to_string(), domain.to_string()))
        .ok_or(NormalizeError::MissingRecipient)?;

    let subject = payload
        .get("subject")
        .map(str::to_string)
        .or_else(|| payload.header("Subject"))
        .unwrap_or_default()
        .trim()
        .to_string();
    let body_html = payload.get("body-html").map(str::to_string);
    let stripped_text = payload
        .get("stripped-text")
        .map(|text| text.trim().to_string());
    let body_plain = payload
        .get("body-plain")
        .map(|text| text.trim().to_string())
        .or_else(|| stripped_text.clone())
        .or_else(|| body_html.as_deref().map(html_to_text))
        .unwrap_or_default();

    let in_reply_to = payload
        .header("In-Reply-To")
        .and_then(|raw| parse_reference_list(&raw).into_iter().next());
    let references = payload
        .header("References")
        .map(|raw| parse_reference_list(&raw))
        .unwrap_or_default();

    let provided = payload
        .header("Message-Id")
        .and_then(|raw| wrap_message_id(&raw));
    let (message_id, message_id_synthesized) = match provided {
        Some(message_id) => (message_id, false),
        None => {
            let timestamp = payload
                .timestamp()
                .map(str::to_string)
                .or_else(|| payload.header("Date"))
                .unwrap_or_default();
            let digest = md5::compute(format!(
                "{}|{}|{}|{}|{}",
                sender, recipient, subject, timestamp, body_plain
            ));
            let message_id = format!("<inbound-{:x}@{}>", digest, recipient_domain);
            info!(
                "inbound from {} had no Message-Id; synthesized {}",
                sender, message_id
            );
            (message_id, true)
        }
    };

    Ok(InboundEmail {
        sender,
        sender_name,
        recipient_local_part,
        recipient_domain,
        subject,
        body_plain,
        body_html,
        stripped_text,
        message_id,
        in_reply_to,
        references,
        message_id_synthesized,
    })
}
