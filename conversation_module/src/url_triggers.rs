use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Built-in categories in their display order, with default keywords.
const BUILTIN_TRIGGERS: &[(&str, &[&str])] = &[
    (
        "trade_in",
        &["trade in", "trade-in", "tradein", "my current car", "what's my car worth", "appraisal"],
    ),
    (
        "scheduler",
        &[
            "test drive",
            "appointment",
            "schedule",
            "scheduling",
            "come in",
            "visit",
            "book a time",
        ],
    ),
    (
        "financing",
        &[
            "financing",
            "finance",
            "loan",
            "loans",
            "credit",
            "monthly payment",
            "apr",
            "lease",
            "leasing",
        ],
    ),
    (
        "inventory",
        &["inventory", "in stock", "available", "other models", "options", "colors"],
    ),
    (
        "warranty",
        &["warranty", "extended warranty", "coverage", "protection plan"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTrigger {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub message: String,
    /// Empty means the built-in keywords of the category apply.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Category name to trigger. Custom categories sort after built-ins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlTriggerConfig {
    pub triggers: BTreeMap<String, UrlTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerMatch {
    pub category: String,
    pub url: String,
    pub message: String,
}

impl UrlTriggerConfig {
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    fn ordered(&self) -> Vec<(&str, &UrlTrigger)> {
        let mut ordered = Vec::with_capacity(self.triggers.len());
        for (name, _) in BUILTIN_TRIGGERS {
            if let Some(trigger) = self.triggers.get(*name) {
                ordered.push((*name, trigger));
            }
        }
        for (name, trigger) in &self.triggers {
            if !BUILTIN_TRIGGERS.iter().any(|(builtin, _)| builtin == name) {
                ordered.push((name.as_str(), trigger));
            }
        }
        ordered
    }
}

fn default_keywords(category: &str) -> &'static [&'static str] {
    BUILTIN_TRIGGERS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, keywords)| *keywords)
        .unwrap_or(&[])
}

fn default_message(category: &str) -> String {
    match category {
        "trade_in" => "Get an instant trade-in estimate".to_string(),
        "scheduler" => "Book a visit or test drive".to_string(),
        "financing" => "Explore financing options".to_string(),
        "inventory" => "Browse current inventory".to_string(),
        "warranty" => "Learn about warranty coverage".to_string(),
        other => other.replace('_', " "),
    }
}

/// Enabled categories whose keywords appear in `text`, in stable order.
pub fn match_triggers(config: &UrlTriggerConfig, text: &str) -> Vec<TriggerMatch> {
    let haystack = text.to_lowercase();
    let mut matches = Vec::new();
    for (category, trigger) in config.ordered() {
        if !trigger.enabled || trigger.url.trim().is_empty() {
            continue;
        }
        let hit = if trigger.keywords.is_empty() {
            default_keywords(category)
                .iter()
                .any(|keyword| contains_word(&haystack, keyword))
        } else {
            trigger
                .keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .any(|keyword| contains_word(&haystack, &keyword))
        };
        if hit {
            let message = if trigger.message.trim().is_empty() {
                default_message(category)
            } else {
                trigger.message.trim().to_string()
            };
            matches.push(TriggerMatch {
                category: category.to_string(),
                url: trigger.url.trim().to_string(),
                message,
            });
        }
    }
    matches
}

/// `keyword` occurs in `haystack` with no letter or digit on either side,
/// so "apr" does not match "april" or "approved".
fn contains_word(haystack: &str, keyword: &str) -> bool {
    haystack.match_indices(keyword).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// `"{message}: {url}"` per match, one per line.
pub fn format_trigger_lines(matches: &[TriggerMatch]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    Some(
        matches
            .iter()
            .map(|entry| format!("{}: {}", entry.message, entry.url))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Appends trigger lines after a blank line.
pub fn append_trigger_lines(body: &str, matches: &[TriggerMatch]) -> String {
    match format_trigger_lines(matches) {
        Some(lines) => format!("{}\n\n{}", body.trim_end(), lines),
        None => body.to_string(),
    }
}
