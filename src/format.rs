//! Text clean-up and markdown-ish to HTML rendering for outbound mail.

use std::sync::LazyLock;

use regex::Regex;

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern is valid"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("italic pattern is valid"));

/// Render model output as an HTML email body.
///
/// HTML is escaped first, then `**bold**` becomes `<strong>`, `*italic*`
/// becomes `<em>` and newlines become `<br>`.
pub fn markdown_to_html(text: &str) -> String {
    let escaped = escape_html(text);
    let bold = BOLD.replace_all(&escaped, "<strong>$1</strong>");
    let italic = ITALIC.replace_all(&bold, "<em>$1</em>");
    italic.replace("\r\n", "\n").replace('\n', "<br>")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drop a leading `Subject:` line the model sometimes writes into the body.
pub fn strip_subject_line(reply: &str) -> String {
    let trimmed = reply.trim_start();
    let first_line = trimmed.lines().next().unwrap_or_default();
    if first_line.trim().to_lowercase().starts_with("subject:") {
        trimmed[first_line.len()..].trim().to_string()
    } else {
        reply.trim().to_string()
    }
}

/// Subject without a leading `Re:`.
pub fn clean_subject(subject: &str) -> String {
    let subject = subject.trim();
    match subject.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("re:") => subject[3..].trim().to_string(),
        _ => subject.to_string(),
    }
}
