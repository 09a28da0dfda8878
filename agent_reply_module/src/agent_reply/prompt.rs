use std::collections::BTreeMap;

use super::constants::{JSON_CONTRACT_INSTRUCTION, STRICT_RETRY_INSTRUCTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    StrictRetry,
}

/// Substitutes `{{key}}` placeholders. Unknown keys render as empty text;
/// an unterminated `{{` is kept literally.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after_open[..end].trim();
        if let Some(value) = variables.get(key) {
            out.push_str(value);
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn build_system_prompt(rendered_template: &str, attempt: Attempt) -> String {
    let mut prompt = rendered_template.trim_end().to_string();
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str(JSON_CONTRACT_INSTRUCTION);
    if attempt == Attempt::StrictRetry {
        prompt.push_str("\n\n");
        prompt.push_str(STRICT_RETRY_INSTRUCTION);
    }
    prompt
}
