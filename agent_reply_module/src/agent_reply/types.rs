use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// What gets sent to the completion service for one attempt.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub user_text: String,
    pub json_response: bool,
}

#[derive(Debug, Clone)]
pub struct AgentRequest<'a> {
    pub agent_id: &'a str,
    pub prompt_template: &'a str,
    pub variables: &'a BTreeMap<String, String>,
    pub history: &'a [ChatMessage],
    pub user_text: &'a str,
    /// Replaces the built-in fallback text when the model output is unusable.
    pub fallback_reply: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub reply: String,
    pub handover: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Parsed(AgentReply),
    Fallback(AgentReply),
}

impl AgentOutcome {
    pub fn reply(&self) -> &AgentReply {
        match self {
            AgentOutcome::Parsed(reply) | AgentOutcome::Fallback(reply) => reply,
        }
    }

    pub fn into_reply(self) -> AgentReply {
        match self {
            AgentOutcome::Parsed(reply) | AgentOutcome::Fallback(reply) => reply,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, AgentOutcome::Fallback(_))
    }
}
