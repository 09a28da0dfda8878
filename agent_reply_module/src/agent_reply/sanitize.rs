use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// Terms the dealership never wants in front of a customer, with the
/// wording used instead. Matching is case-insensitive on word boundaries.
pub const DEFAULT_DISALLOWED_TERMS: &[(&str, &str)] = &[
    ("guaranteed approval", "fast approval"),
    ("guaranteed", "expected"),
    ("guarantee", "aim"),
    ("lowest price", "competitive price"),
    ("cheapest", "most affordable"),
    ("as an ai", "as your assistant"),
    ("language model", "assistant"),
    ("no credit check", "flexible credit options"),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisallowedTerm {
    pub term: String,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    markup: Vec<Regex>,
    rules: Vec<(Regex, String)>,
    spaces: Option<Regex>,
    blank_lines: Option<Regex>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let terms = DEFAULT_DISALLOWED_TERMS
            .iter()
            .map(|(term, replacement)| DisallowedTerm {
                term: term.to_string(),
                replacement: replacement.to_string(),
            })
            .collect::<Vec<_>>();
        Self::new(&terms)
    }
}

impl Sanitizer {
    pub fn new(terms: &[DisallowedTerm]) -> Self {
        // Longer terms first so "guaranteed approval" wins over "guaranteed".
        let mut ordered = terms
            .iter()
            .filter(|entry| !entry.term.trim().is_empty())
            .collect::<Vec<_>>();
        ordered.sort_by(|a, b| b.term.len().cmp(&a.term.len()));
        let rules = ordered
            .into_iter()
            .filter_map(|entry| {
                let pattern = format!(r"\b{}\b", regex::escape(entry.term.trim()));
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|regex| (regex, entry.replacement.clone()))
            })
            .collect();
        let markup = [r"```[A-Za-z0-9_-]*", r"(?s)<!--.*?-->", r"<[^>]*>"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        Self {
            markup,
            rules,
            spaces: Regex::new(r"[ \t]+").ok(),
            blank_lines: Regex::new(r"\n{3,}").ok(),
        }
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.replace("\r\n", "\n");
        for regex in &self.markup {
            out = regex.replace_all(&out, "").into_owned();
        }
        out = decode_basic_entities(&out);
        for (regex, replacement) in &self.rules {
            out = regex.replace_all(&out, replacement.as_str()).into_owned();
        }
        if let Some(spaces) = &self.spaces {
            out = spaces.replace_all(&out, " ").into_owned();
        }
        if let Some(blank_lines) = &self.blank_lines {
            out = blank_lines.replace_all(&out, "\n\n").into_owned();
        }
        out.lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

fn decode_basic_entities(value: &str) -> String {
    value
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Truncates to `max_words` whitespace-separated words, keeping the original
/// spacing and line breaks of the retained prefix.
pub fn cap_words(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    let mut count = 0usize;
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                in_word = false;
                if count == max_words {
                    return text[..idx].trim().to_string();
                }
            }
        } else if !in_word {
            in_word = true;
            count += 1;
        }
    }
    text.trim().to_string()
}
