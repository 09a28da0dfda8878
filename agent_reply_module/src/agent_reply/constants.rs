pub const MAX_OUTPUT_WORDS: usize = 120;

pub const FALLBACK_REPLY: &str = "Thanks so much for reaching out! I'm connecting you with one of our specialists, who will follow up with you shortly.";
pub const FALLBACK_REASON: &str = "malformed_output";
pub(super) const EMPTY_REPLY_REASON: &str = "empty_reply";

pub(super) const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub(super) const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub(super) const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 30;
pub(super) const DEFAULT_TEMPERATURE: f32 = 0.4;

pub(super) const JSON_CONTRACT_INSTRUCTION: &str = "Respond with a single JSON object containing exactly three fields: \"reply\" (string, the email body to send to the customer), \"handover\" (boolean, true when a human salesperson should take over the conversation), and \"reason\" (string, a short explanation of your decision). Output the JSON object and nothing else.";

pub(super) const STRICT_RETRY_INSTRUCTION: &str = "Your previous answer could not be parsed. Return JSON only: no prose, no markdown, no code fences. The object must have \"reply\" (string), \"handover\" (boolean) and \"reason\" (string).";
