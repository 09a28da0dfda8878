//! Message-ID generation, In-Reply-To/References construction and sending
//! identities. Everything here is pure except [`generate_message_id`].

use chrono::{DateTime, Utc};
use rand::RngCore;

/// Maximum number of ids kept in a References header.
pub const MAX_REFERENCES: usize = 10;
/// Byte budget of the space-joined References value.
pub const MAX_REFERENCES_BYTES: usize = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LeadMessage,
    AgentReply,
    CampaignStep,
}

impl Direction {
    pub fn token(&self) -> &'static str {
        match self {
            Direction::LeadMessage => "lead-msg",
            Direction::AgentReply => "agent-reply",
            Direction::CampaignStep => "campaign-step",
        }
    }
}

/// `<{direction}.{conversation}.{millis}.{nonce}@{domain}>`
pub fn build_message_id(
    conversation_id: &str,
    direction: Direction,
    at: DateTime<Utc>,
    nonce: &str,
    domain: &str,
) -> String {
    format!(
        "<{}.{}.{}.{}@{}>",
        direction.token(),
        conversation_id,
        at.timestamp_millis(),
        nonce,
        domain.trim().to_ascii_lowercase()
    )
}

pub fn generate_message_id(conversation_id: &str, direction: Direction, domain: &str) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    build_message_id(
        conversation_id,
        direction,
        Utc::now(),
        &hex::encode(bytes),
        domain,
    )
}

/// Wraps an id in angle brackets; `None` for blank input.
pub fn wrap_message_id(raw: &str) -> Option<String> {
    let inner = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if inner.is_empty() {
        None
    } else {
        Some(format!("<{}>", inner))
    }
}

/// Splits a References/In-Reply-To value into wrapped ids.
pub fn parse_reference_list(raw: &str) -> Vec<String> {
    raw.split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter_map(wrap_message_id)
        .collect()
}

/// Keeps the newest ids that fit both limits, in chronological order.
/// Blank ids are skipped and a repeated id keeps only its latest position.
pub fn cap_references<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    for id in ids {
        if let Some(wrapped) = wrap_message_id(id.as_ref()) {
            ordered.retain(|existing| existing != &wrapped);
            ordered.push(wrapped);
        }
    }

    let mut kept: Vec<String> = Vec::new();
    let mut bytes = 0usize;
    for id in ordered.into_iter().rev() {
        if kept.len() == MAX_REFERENCES {
            break;
        }
        let added = if kept.is_empty() { id.len() } else { id.len() + 1 };
        if bytes + added > MAX_REFERENCES_BYTES {
            break;
        }
        bytes += added;
        kept.push(id);
    }
    kept.reverse();
    kept
}

pub fn references_header(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.join(" "))
    }
}

/// Merges the lead's References with the ids stored for the conversation.
/// An id present in both keeps its stored (chronological) position, so the
/// chain ends with the newest stored message.
pub fn thread_chain(inbound_references: &[String], stored_ids: &[String]) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    for id in inbound_references.iter().chain(stored_ids.iter()) {
        if let Some(wrapped) = wrap_message_id(id) {
            chain.retain(|existing| existing != &wrapped);
            chain.push(wrapped);
        }
    }
    chain
}

/// `Display Name <local@domain>`, quoting names with RFC 5322 specials.
pub fn format_identity(display_name: &str, local_part: &str, domain: &str) -> String {
    let address = format!(
        "{}@{}",
        local_part.trim().to_ascii_lowercase(),
        domain.trim().to_ascii_lowercase()
    );
    let name: String = display_name
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string();
    if name.is_empty() {
        return address;
    }
    let needs_quotes = name
        .chars()
        .any(|ch| matches!(ch, '(' | ')' | '<' | '>' | '[' | ']' | ':' | ';' | '@' | '\\' | ',' | '.' | '"'));
    if needs_quotes {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\" <{}>", escaped, address)
    } else {
        format!("{} <{}>", name, address)
    }
}

pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        return "Re: (no subject)".to_string();
    }
    let already_reply = trimmed
        .get(..3)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("re:"));
    if already_reply {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn message_id_has_direction_conversation_and_domain() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            build_message_id("conv-1", Direction::AgentReply, at, "0a0b", "MG.Dealer.com"),
            "<agent-reply.conv-1.1700000000123.0a0b@mg.dealer.com>"
        );
        let generated = generate_message_id("conv-1", Direction::CampaignStep, "mg.dealer.com");
        assert!(generated.starts_with("<campaign-step.conv-1."));
        assert!(generated.ends_with("@mg.dealer.com>"));
        assert_ne!(
            generated,
            generate_message_id("conv-1", Direction::CampaignStep, "mg.dealer.com")
        );
    }

    #[test]
    fn references_keep_last_ten_in_order() {
        let ids: Vec<String> = (0..15).map(|idx| format!("m{}@d", idx)).collect();
        let capped = cap_references(&ids);
        assert_eq!(capped.len(), MAX_REFERENCES);
        assert_eq!(capped.first().map(String::as_str), Some("<m5@d>"));
        assert_eq!(capped.last().map(String::as_str), Some("<m14@d>"));
    }

    #[test]
    fn references_respect_byte_budget() {
        let ids: Vec<String> = (0..10)
            .map(|idx| format!("<{}{}@example.com>", idx, "x".repeat(150)))
            .collect();
        let capped = cap_references(&ids);
        let header = references_header(&capped).expect("header");
        assert!(header.len() <= MAX_REFERENCES_BYTES);
        assert!(capped.len() < 10);
        assert_eq!(capped.last(), ids.last());
        assert!(capped.iter().all(|id| id.starts_with('<') && id.ends_with('>')));
    }

    #[test]
    fn references_skip_blank_and_dedupe() {
        let ids = vec!["<a@d>", "", "b@d", "<a@d>", "  "];
        assert_eq!(cap_references(&ids), vec!["<b@d>", "<a@d>"]);
        assert!(references_header(&[]).is_none());
    }

    #[test]
    fn thread_chain_merges_without_duplicates() {
        let inbound = parse_reference_list("<x@lead.com>, <a@d>");
        let stored = vec!["<a@d>".to_string(), "<b@d>".to_string()];
        assert_eq!(
            thread_chain(&inbound, &stored),
            vec!["<x@lead.com>", "<a@d>", "<b@d>"]
        );
    }

    #[test]
    fn identity_quotes_specials() {
        assert_eq!(
            format_identity("Sarah Lee", "Sarah", "MG.dealer.com"),
            "Sarah Lee <sarah@mg.dealer.com>"
        );
        assert_eq!(
            format_identity("Lee, Sarah \"Sales\"", "sarah", "dealer.com"),
            "\"Lee, Sarah \\\"Sales\\\"\" <sarah@dealer.com>"
        );
        assert_eq!(format_identity("  ", "sarah", "dealer.com"), "sarah@dealer.com");
    }

    #[test]
    fn reply_subject_prefixes_once() {
        assert_eq!(reply_subject("Civic"), "Re: Civic");
        assert_eq!(reply_subject("RE: Civic"), "RE: Civic");
        assert_eq!(reply_subject(""), "Re: (no subject)");
    }
}
