use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::threading::format_identity;

/// A configured sending identity. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub domain: String,
    pub local_part: String,
    #[serde(default)]
    pub prompt_template: String,
    /// Template variables: role, dealership, handover_line, plus free-form keys.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Agent {
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }

    /// `Display Name <local@domain>`, used for From and Reply-To.
    pub fn identity(&self) -> String {
        format_identity(&self.display_name, &self.local_part, &self.domain)
    }

    pub fn handover_line(&self) -> Option<&str> {
        self.variables
            .get("handover_line")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Variables visible to prompt and campaign templates.
    pub fn template_variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        vars.insert("agent_name".to_string(), self.display_name.clone());
        vars.insert("agent_email".to_string(), self.address());
        vars
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        other
                    )),
                }
            }
        }
    };
}

string_enum!(ConversationStatus {
    Active => "active",
    HandedOver => "handed_over",
});

string_enum!(MessageSender {
    Lead => "lead",
    Agent => "agent",
});

string_enum!(MessageStatus {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

string_enum!(CampaignStatus {
    Draft => "draft",
    Active => "active",
    Completed => "completed",
});

string_enum!(LeadStatus {
    Active => "active",
    Unsubscribed => "unsubscribed",
    Completed => "completed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub agent_id: String,
    pub lead_email: String,
    pub subject: String,
    pub status: ConversationStatus,
    pub last_outbound_message_id: Option<String>,
    pub handover_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_handed_over(&self) -> bool {
        self.status == ConversationStatus::HandedOver
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: MessageSender,
    pub subject: String,
    pub content: String,
    pub status: MessageStatus,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`Message`]; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender: MessageSender,
    pub subject: String,
    pub content: String,
    pub status: MessageStatus,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStep {
    pub offset_days: i64,
    pub subject: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Campaign {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub steps: Vec<CampaignStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lead {
    pub id: String,
    pub campaign_id: String,
    pub agent_id: String,
    pub email: String,
    pub name: Option<String>,
    pub status: LeadStatus,
    pub sequence_index: usize,
    pub next_send_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub campaign_id: String,
    pub agent_id: String,
    pub email: String,
    pub name: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Lowercased bare address, or `None` when the value has no usable address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some(stripped) = value.strip_prefix("mailto:") {
        value = stripped.trim();
    }
    let value = value.trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\'' | ',' | ';'));
    let (local, domain) = value.rsplit_once('@')?;
    let local = local.trim();
    let domain = domain.trim();
    if local.is_empty() || domain.is_empty() || local.contains(char::is_whitespace) {
        return None;
    }
    Some(format!(
        "{}@{}",
        local.to_ascii_lowercase(),
        domain.to_ascii_lowercase()
    ))
}

/// First address found in a header value such as `Name <a@b>, c@d`.
pub fn extract_first_email(raw: &str) -> Option<String> {
    if let Some(start) = raw.find('<') {
        if let Some(end) = raw[start + 1..].find('>') {
            if let Some(email) = normalize_email(&raw[start + 1..start + 1 + end]) {
                return Some(email);
            }
        }
    }
    raw.split(|ch| matches!(ch, ',' | ';' | ' ' | '\t' | '\n' | '\r'))
        .find_map(normalize_email)
}

/// Display name part of `Name <a@b>`, unquoted.
pub fn extract_display_name(raw: &str) -> Option<String> {
    let start = raw.find('<')?;
    let name = raw[..start].trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
