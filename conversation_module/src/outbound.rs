use std::collections::BTreeMap;

use send_emails_module::{MailgunConfig, SendEmailError, SendEmailParams};
use tracing::{info, warn};

use crate::html::render_html_body;
use crate::models::{Agent, Message, MessageSender, MessageStatus, NewMessage};
use crate::store::{ConversationStore, StoreError};
use crate::threading::{cap_references, generate_message_id, references_header, Direction};

/// A fully threaded message ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub reply_to: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub conversation_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Send(#[from] SendEmailError),
    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// Seam to the email provider. Returns the provider-assigned message id.
pub trait MailTransport: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> Result<String, TransportError>;
}

/// Sends through `send_emails_module` with a fixed provider config.
#[derive(Debug, Clone)]
pub struct MailgunTransport {
    config: MailgunConfig,
}

impl MailgunTransport {
    pub fn new(config: MailgunConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Result<Self, SendEmailError> {
        Ok(Self::new(MailgunConfig::from_env()?))
    }
}

impl MailTransport for MailgunTransport {
    fn send(&self, email: &OutboundEmail) -> Result<String, TransportError> {
        let mut headers = BTreeMap::new();
        headers.insert("X-Conversation-Id".to_string(), email.conversation_id.clone());
        let params = SendEmailParams {
            subject: email.subject.clone(),
            from: email.from.clone(),
            to: vec![email.to.clone()],
            reply_to: Some(email.reply_to.clone()),
            text_body: email.text_body.clone(),
            html_body: Some(email.html_body.clone()),
            message_id: Some(email.message_id.clone()),
            in_reply_to: email.in_reply_to.clone(),
            references: email.references.clone(),
            headers,
        };
        let response = send_emails_module::send_email_with(&self.config, &params)?;
        Ok(response.message_id)
    }
}

/// What the caller wants sent; identity and threading ids are filled in by
/// [`dispatch_outbound`].
#[derive(Debug, Clone)]
pub struct OutboundDraft {
    pub direction: Direction,
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub in_reply_to: Option<String>,
    /// Thread ids, oldest first; capped before sending.
    pub thread_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub message: Message,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn is_sent(&self) -> bool {
        self.status == MessageStatus::Sent
    }
}

/// Shared send path: persist `pending`, hand to the transport, then record
/// `sent` or `failed`. Transport errors are recorded, not returned.
pub fn dispatch_outbound(
    store: &ConversationStore,
    transport: &dyn MailTransport,
    agent: &Agent,
    conversation_id: &str,
    draft: OutboundDraft,
) -> Result<DispatchResult, StoreError> {
    let message_id = generate_message_id(conversation_id, draft.direction, &agent.domain);
    let references = references_header(&cap_references(&draft.thread_ids));
    let pending = store
        .insert_message(&NewMessage {
            conversation_id: conversation_id.to_string(),
            sender: MessageSender::Agent,
            subject: draft.subject.clone(),
            content: draft.body_text.clone(),
            status: MessageStatus::Pending,
            message_id: message_id.clone(),
            in_reply_to: draft.in_reply_to.clone(),
            references: references.clone(),
        })?
        .ok_or_else(|| StoreError::Storage(format!("message id collision: {}", message_id)))?;

    let identity = agent.identity();
    let email = OutboundEmail {
        from: identity.clone(),
        reply_to: identity,
        to: draft.to,
        subject: draft.subject,
        html_body: render_html_body(&draft.body_text),
        text_body: draft.body_text,
        message_id: message_id.clone(),
        in_reply_to: draft.in_reply_to,
        references,
        conversation_id: conversation_id.to_string(),
    };

    match transport.send(&email) {
        Ok(provider_message_id) => {
            let provider = Some(provider_message_id.as_str()).filter(|id| !id.trim().is_empty());
            store.mark_message_sent(&pending.id, provider)?;
            store.set_last_outbound(conversation_id, &message_id)?;
            info!(
                "sent {} conversation_id={} message_id={} provider_id={}",
                draft.direction.token(),
                conversation_id,
                message_id,
                provider_message_id
            );
            Ok(DispatchResult {
                message: pending,
                status: MessageStatus::Sent,
                provider_message_id: provider.map(str::to_string),
                error: None,
            })
        }
        Err(err) => {
            let error = err.to_string();
            store.mark_message_failed(&pending.id, &error)?;
            warn!(
                "send failed conversation_id={} message_id={}: {}",
                conversation_id, message_id, error
            );
            Ok(DispatchResult {
                message: pending,
                status: MessageStatus::Failed,
                provider_message_id: None,
                error: Some(error),
            })
        }
    }
}
