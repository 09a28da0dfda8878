use std::sync::Arc;

use tracing::{debug, warn};

use super::client::CompletionClient;
use super::constants::{EMPTY_REPLY_REASON, FALLBACK_REASON, FALLBACK_REPLY, MAX_OUTPUT_WORDS};
use super::prompt::{build_system_prompt, render_template, Attempt};
use super::sanitize::{cap_words, Sanitizer};
use super::types::{AgentOutcome, AgentReply, AgentRequest, CompletionRequest};

/// Generates one agent reply under the strict JSON contract.
///
/// At most two completion calls are made. Whatever the model does, the
/// result is an [`AgentOutcome`]; unusable output degrades to a handover.
#[derive(Clone)]
pub struct AgentCore {
    client: Arc<dyn CompletionClient>,
    sanitizer: Sanitizer,
}

impl AgentCore {
    pub fn new(client: Arc<dyn CompletionClient>, sanitizer: Sanitizer) -> Self {
        Self { client, sanitizer }
    }

    pub fn generate(&self, request: &AgentRequest<'_>) -> AgentOutcome {
        let rendered = render_template(request.prompt_template, request.variables);
        for attempt in [Attempt::Initial, Attempt::StrictRetry] {
            let completion = CompletionRequest {
                system_prompt: build_system_prompt(&rendered, attempt),
                history: request.history.to_vec(),
                user_text: request.user_text.to_string(),
                json_response: true,
            };
            match self.client.complete(&completion) {
                Ok(raw) => match parse_agent_reply(&raw) {
                    Some(reply) => {
                        debug!(
                            "agent {} produced parseable output on {:?} attempt",
                            request.agent_id, attempt
                        );
                        return self.post_process(reply, request.fallback_reply);
                    }
                    None => warn!(
                        "agent {} returned malformed output on {:?} attempt ({} bytes)",
                        request.agent_id,
                        attempt,
                        raw.len()
                    ),
                },
                Err(err) if err.is_timeout() => warn!(
                    "agent {} completion timed out on {:?} attempt",
                    request.agent_id, attempt
                ),
                Err(err) => warn!(
                    "agent {} completion failed on {:?} attempt: {}",
                    request.agent_id, attempt, err
                ),
            }
        }
        warn!(
            "agent {} output unusable after retry; handing over",
            request.agent_id
        );
        AgentOutcome::Fallback(fallback_reply(request.fallback_reply, FALLBACK_REASON))
    }

    fn post_process(&self, reply: AgentReply, fallback: Option<&str>) -> AgentOutcome {
        let text = cap_words(&self.sanitizer.sanitize(&reply.reply), MAX_OUTPUT_WORDS);
        let reason = cap_words(&self.sanitizer.sanitize(&reply.reason), MAX_OUTPUT_WORDS);
        if text.is_empty() {
            return AgentOutcome::Fallback(fallback_reply(fallback, EMPTY_REPLY_REASON));
        }
        AgentOutcome::Parsed(AgentReply {
            reply: text,
            handover: reply.handover,
            reason,
        })
    }
}

fn fallback_reply(custom: Option<&str>, reason: &str) -> AgentReply {
    let reply = custom
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(FALLBACK_REPLY);
    AgentReply {
        reply: cap_words(reply, MAX_OUTPUT_WORDS),
        handover: true,
        reason: reason.to_string(),
    }
}

/// Strict parse of the three-field contract. Surrounding whitespace is the
/// only tolerance; prose or code fences fail.
pub fn parse_agent_reply(raw: &str) -> Option<AgentReply> {
    serde_json::from_str::<AgentReply>(raw.trim()).ok()
}
