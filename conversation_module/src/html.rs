use regex::Regex;

/// Plain-text rendering of an HTML body: block breaks become newlines,
/// scripts and styles are dropped, remaining tags are removed.
pub fn html_to_text(input: &str) -> String {
    let mut text = input.replace("\r\n", "\n");
    if let Ok(hidden) = Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)\s*>") {
        text = hidden.replace_all(&text, "").into_owned();
    }
    if let Ok(breaks) = Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>|</tr\s*>") {
        text = breaks.replace_all(&text, "\n").into_owned();
    }
    let text = decode_entities(&strip_html_tags(&text));
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && lines.last().map_or(true, |last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

pub fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// HTML alternative for an outbound plain-text body: blank lines separate
/// paragraphs and single newlines become `<br>`.
pub fn render_html_body(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let paragraphs: Vec<String> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            let lines: Vec<String> = block.lines().map(|line| escape_html(line.trim())).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect();
    format!("<html><body>{}</body></html>", paragraphs.join(""))
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_keeps_paragraph_breaks() {
        let html = "<html><head><style>p{}</style></head><body><p>Hi Sarah,</p><p>Is the Civic &amp; the Accord<br/>still there?</p><div></div></body></html>";
        assert_eq!(
            html_to_text(html),
            "Hi Sarah,\nIs the Civic & the Accord\nstill there?"
        );
    }

    #[test]
    fn render_html_body_escapes_and_splits() {
        assert_eq!(
            render_html_body("Hi <Jane>,\n\nLine one\nLine two\n"),
            "<html><body><p>Hi &lt;Jane&gt;,</p><p>Line one<br>Line two</p></body></html>"
        );
    }
}
