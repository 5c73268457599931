//! Turning Gmail message parts into plain, model-friendly text.

use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::DateTime;
use regex::Regex;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn invisible_chars() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    // Format, nonspacing-mark and control characters, except newline and tab.
    regex(&CELL, r"[\p{Cf}\p{Mn}\p{Cc}&&[^\n\t]]")
}

fn script_or_style() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>")
}

fn html_comment() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?s)<!--.*?-->")
}

fn any_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?s)<[^>]*>")
}

fn numeric_entity() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"&#(?:(\d+)|[xX]([0-9a-fA-F]+));")
}

fn trailing_comment() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"\s*\([^)]*\)\s*$")
}

/// Strip invisible characters, normalize odd spaces and line endings, trim
/// every line and drop blank ones.
pub fn clean_text(text: &str) -> String {
    let visible = invisible_chars().replace_all(text, "");
    let spaced = visible
        .replace(['\u{00a0}', '\u{202f}', '\u{2007}'], " ")
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    spaced
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text content of an HTML body: scripts and styles removed, each tag
/// treated as a line break, entities decoded.
pub fn html_to_text(html: &str) -> String {
    let without_code = script_or_style().replace_all(html, "");
    let without_comments = html_comment().replace_all(&without_code, "");
    let text = any_tag().replace_all(&without_comments, "\n");
    clean_text(&decode_entities(&text))
}

fn decode_entities(input: &str) -> String {
    let numeric = numeric_entity().replace_all(input, |caps: &regex::Captures| {
        let codepoint = match (caps.get(1), caps.get(2)) {
            (Some(decimal), _) => decimal.as_str().parse::<u32>().ok(),
            (None, Some(hex)) => u32::from_str_radix(hex.as_str(), 16).ok(),
            _ => None,
        };
        codepoint
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    // &amp; last so "&amp;lt;" stays "&lt;".
    numeric
        .replace("&nbsp;", "\u{00a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `Fri, 03 Oct 2025` from an RFC 2822 `Date` header; the raw value when it
/// does not parse.
pub fn format_email_date(raw: &str) -> String {
    let candidate = trailing_comment().replace(raw.trim(), "");
    DateTime::parse_from_rfc2822(&candidate)
        .map(|parsed| parsed.format("%a, %d %b %Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Decode a Gmail body (`base64url`, padding optional) to text.
pub fn decode_body_data(data: &str) -> Option<String> {
    let trimmed = data.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(trimmed).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
