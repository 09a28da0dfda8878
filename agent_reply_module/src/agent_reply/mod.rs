mod client;
mod constants;
mod core;
mod errors;
mod prompt;
mod sanitize;
mod types;

pub use client::{CompletionClient, OpenAiCompletionClient};
pub use constants::{FALLBACK_REASON, FALLBACK_REPLY, MAX_OUTPUT_WORDS};
pub use self::core::{parse_agent_reply, AgentCore};
pub use errors::CompletionError;
pub use prompt::{build_system_prompt, render_template, Attempt};
pub use sanitize::{cap_words, DisallowedTerm, Sanitizer, DEFAULT_DISALLOWED_TERMS};
pub use types::{AgentOutcome, AgentReply, AgentRequest, ChatMessage, ChatRole, CompletionRequest};
