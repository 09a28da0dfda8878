use std::collections::BTreeMap;
use std::sync::Arc;

use agent_reply_module::{AgentCore, AgentRequest, ChatMessage};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::inbound::{DeliveryEvent, DeliveryEventKind, InboundEmail};
use crate::models::{Agent, Message, MessageSender, MessageStatus, NewMessage};
use crate::outbound::{dispatch_outbound, MailTransport, OutboundDraft};
use crate::store::{ConversationStore, StoreError};
use crate::threading::{reply_subject, thread_chain, Direction};
use crate::url_triggers::{append_trigger_lines, match_triggers, UrlTriggerConfig};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no agent for recipient {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplySummary {
    pub conversation_id: String,
    pub message_id: String,
    pub status: MessageStatus,
    pub handover: bool,
    pub fallback: bool,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Duplicate { message_id: String },
    HandedOver { conversation_id: String },
    Replied(ReplySummary),
}

impl InboundOutcome {
    pub fn status_label(&self) -> &'static str {
        match self {
            InboundOutcome::Duplicate { .. } => "duplicate",
            InboundOutcome::HandedOver { .. } => "handed_over",
            InboundOutcome::Replied(_) => "replied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Updated(MessageStatus),
    Ignored,
    UnknownMessage,
}

/// Turns one inbound lead email into at most one threaded agent reply.
pub struct ConversationEngine {
    store: Arc<ConversationStore>,
    transport: Arc<dyn MailTransport>,
    agent_core: AgentCore,
    url_triggers: UrlTriggerConfig,
    history_limit: usize,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        transport: Arc<dyn MailTransport>,
        agent_core: AgentCore,
    ) -> Self {
        Self {
            store,
            transport,
            agent_core,
            url_triggers: UrlTriggerConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_url_triggers(mut self, url_triggers: UrlTriggerConfig) -> Self {
        self.url_triggers = url_triggers;
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn MailTransport> {
        &self.transport
    }

    pub fn process_inbound(&self, inbound: &InboundEmail) -> Result<InboundOutcome, ProcessError> {
        if self.store.message_exists(&inbound.message_id)? {
            info!("duplicate inbound message_id={}", inbound.message_id);
            return Ok(InboundOutcome::Duplicate {
                message_id: inbound.message_id.clone(),
            });
        }

        let agent = self
            .store
            .find_agent_by_address(&inbound.recipient_local_part, &inbound.recipient_domain)?
            .ok_or_else(|| ProcessError::NotFound(inbound.recipient()))?;
        let conversation = self.store.get_or_create_conversation(
            &agent.id,
            &inbound.sender,
            subject_or_default(&inbound.subject),
        )?;

        let stored = self.store.insert_message(&NewMessage {
            conversation_id: conversation.id.clone(),
            sender: MessageSender::Lead,
            subject: inbound.subject.clone(),
            content: inbound.lead_text().to_string(),
            status: MessageStatus::Sent,
            message_id: inbound.message_id.clone(),
            in_reply_to: inbound.in_reply_to.clone(),
            references: (!inbound.references.is_empty()).then(|| inbound.references.join(" ")),
        })?;
        if stored.is_none() {
            info!(
                "inbound message_id={} lost insert race; treating as duplicate",
                inbound.message_id
            );
            return Ok(InboundOutcome::Duplicate {
                message_id: inbound.message_id.clone(),
            });
        }

        if conversation.is_handed_over() {
            info!(
                "conversation_id={} is handed over; recorded inbound without reply",
                conversation.id
            );
            return Ok(InboundOutcome::HandedOver {
                conversation_id: conversation.id,
            });
        }

        let history = self
            .store
            .recent_messages(&conversation.id, self.history_limit, Some(&inbound.message_id))?;
        let history = chat_history(&history);
        let variables = conversation_variables(
            &agent,
            &inbound.sender,
            inbound.sender_name.as_deref(),
            &conversation.subject,
        );
        let outcome = self.agent_core.generate(&AgentRequest {
            agent_id: &agent.id,
            prompt_template: &agent.prompt_template,
            variables: &variables,
            history: &history,
            user_text: inbound.lead_text(),
            fallback_reply: agent.handover_line(),
        });
        let fallback = outcome.is_fallback();
        let reply = outcome.into_reply();
        debug!(
            "agent {} reply for conversation_id={} handover={} reason={}",
            agent.id, conversation.id, reply.handover, reply.reason
        );

        let triggers = match_triggers(&self.url_triggers, inbound.lead_text());
        let body_text = append_trigger_lines(&reply.reply, &triggers);
        let stored_ids = self.store.thread_message_ids(&conversation.id)?;
        let subject_source = if inbound.subject.trim().is_empty() {
            conversation.subject.as_str()
        } else {
            inbound.subject.as_str()
        };
        let dispatched = dispatch_outbound(
            &self.store,
            self.transport.as_ref(),
            &agent,
            &conversation.id,
            OutboundDraft {
                direction: Direction::AgentReply,
                to: inbound.sender.clone(),
                subject: reply_subject(subject_source),
                body_text,
                in_reply_to: Some(inbound.message_id.clone()),
                thread_ids: thread_chain(&inbound.references, &stored_ids),
            },
        )?;

        if reply.handover {
            if self.store.mark_handed_over(&conversation.id, &reply.reason)? {
                info!(
                    "conversation_id={} handed over: {}",
                    conversation.id, reply.reason
                );
            }
        }

        Ok(InboundOutcome::Replied(ReplySummary {
            conversation_id: conversation.id,
            message_id: dispatched.message.message_id.clone(),
            status: dispatched.status,
            handover: reply.handover,
            fallback,
            provider_message_id: dispatched.provider_message_id,
        }))
    }

    /// Applies a provider delivery event to the outbound row it names.
    pub fn record_delivery_event(
        &self,
        event: &DeliveryEvent,
    ) -> Result<DeliveryOutcome, ProcessError> {
        let Some(message) = self.store.get_message_by_message_id(&event.message_id)? else {
            warn!("delivery event for unknown message_id={}", event.message_id);
            return Ok(DeliveryOutcome::UnknownMessage);
        };
        if message.provider_message_id.is_none() {
            self.store
                .set_provider_message_id(&message.id, &event.message_id)?;
        }

        let outcome = match &event.kind {
            DeliveryEventKind::Delivered if message.status == MessageStatus::Pending => {
                if self.store.mark_message_sent(&message.id, None)? {
                    DeliveryOutcome::Updated(MessageStatus::Sent)
                } else {
                    DeliveryOutcome::Ignored
                }
            }
            DeliveryEventKind::Failed { permanent: true }
                if message.status == MessageStatus::Pending =>
            {
                let reason = event.reason.as_deref().unwrap_or("permanent delivery failure");
                if self.store.mark_message_failed(&message.id, reason)? {
                    DeliveryOutcome::Updated(MessageStatus::Failed)
                } else {
                    DeliveryOutcome::Ignored
                }
            }
            _ => DeliveryOutcome::Ignored,
        };
        match outcome {
            DeliveryOutcome::Updated(status) => info!(
                "delivery event moved message_id={} to {}",
                event.message_id, status
            ),
            _ => debug!(
                "delivery event {:?} ignored for message_id={} (status {})",
                event.kind, event.message_id, message.status
            ),
        }
        Ok(outcome)
    }
}

/// Stored messages as completion turns: lead -> user, agent -> assistant.
/// Failed sends never reached the lead and are left out.
pub fn chat_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|message| message.status != MessageStatus::Failed)
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| match message.sender {
            MessageSender::Lead => ChatMessage::user(message.content.clone()),
            MessageSender::Agent => ChatMessage::assistant(message.content.clone()),
        })
        .collect()
}

/// Agent variables plus the lead and thread context.
pub fn conversation_variables(
    agent: &Agent,
    lead_email: &str,
    lead_name: Option<&str>,
    subject: &str,
) -> BTreeMap<String, String> {
    let mut variables = agent.template_variables();
    variables.insert("lead_email".to_string(), lead_email.to_string());
    let lead_name = lead_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            lead_email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string()
        });
    variables.insert("lead_name".to_string(), lead_name);
    variables.insert("subject".to_string(), subject.to_string());
    variables
}

fn subject_or_default(subject: &str) -> &str {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        "(no subject)"
    } else {
        trimmed
    }
}
