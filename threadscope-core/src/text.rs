//! Text helpers for preparing Reddit content for prompts.

use regex::Regex;
use std::sync::LazyLock;

static RE_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:&gt;|>).*$").expect("static regex"));
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^\)]+\)").expect("static regex"));
static RE_CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\s\S]*?```").expect("static regex"));
static RE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("static regex"));
static RE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("static regex"));
static RE_STRIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~(.*?)~~").expect("static regex"));
static RE_INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("static regex"));
static RE_INDENTED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ {4}.*$").expect("static regex"));
static RE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]*").expect("static regex"));
static RE_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[-*_]{3,}[ \t]*$").expect("static regex"));
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[*\-+][ \t]+").expect("static regex"));
static RE_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+\.[ \t]+").expect("static regex"));
static RE_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").expect("static regex"));
static RE_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));

/// Strips Reddit-flavoured markdown down to readable plain text.
///
/// Quoted lines and code are removed entirely; links keep their label.
pub fn markdown_to_plain_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let text = RE_QUOTE.replace_all(text, "");
    let text = RE_LINK.replace_all(&text, "$1");
    // Fenced blocks go before inline code so the fences are not read as spans.
    let text = RE_CODE_BLOCK.replace_all(&text, "");
    let text = RE_INDENTED_CODE.replace_all(&text, "");
    let text = RE_BOLD.replace_all(&text, "$1");
    let text = RE_ITALIC.replace_all(&text, "$1");
    let text = RE_STRIKE.replace_all(&text, "$1");
    let text = RE_INLINE_CODE.replace_all(&text, "$1");
    let text = RE_HEADER.replace_all(&text, "");
    let text = RE_RULE.replace_all(&text, "");
    let text = RE_BULLET.replace_all(&text, "");
    let text = RE_NUMBERED.replace_all(&text, "");
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");
    let text = RE_SPACES.replace_all(&text, " ");

    text.trim().to_string()
}

/// Rough token estimate: four characters per token.
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count() / 4
}

/// Returns at most `max_chars` characters of `text`, never splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_and_emphasis() {
        let plain = markdown_to_plain_text(
            "I used **Zoom** and *FaceTime* with [my mom](https://example.com), ~~never~~ `ssh`",
        );
        assert_eq!(plain, "I used Zoom and FaceTime with my mom, never ssh");
    }

    #[test]
    fn test_quotes_and_code_are_removed() {
        let text = "&gt; quoted reply\n> another quote\nreal text\n```\nlet x = 1;\n```\n    indented code\nend";
        let plain = markdown_to_plain_text(text);
        assert!(!plain.contains("quote"));
        assert!(!plain.contains("let x"));
        assert!(!plain.contains("indented"));
        assert!(plain.starts_with("real text"));
        assert!(plain.ends_with("end"));
    }

    #[test]
    fn test_structure_markers_and_whitespace() {
        let text = "## Header\n\n\n- first\n* second\n1. third\n---\nlots    of\t\tspace";
        assert_eq!(
            markdown_to_plain_text(text),
            "Header\n\nfirst\nsecond\nthird\n\nlots of space"
        );
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(markdown_to_plain_text("   \n "), "");
    }

    #[test]
    fn test_token_estimate_and_truncation() {
        assert_eq!(estimate_token_count(""), 0);
        assert_eq!(estimate_token_count("abcdefgh"), 2);

        let text = "héllo wörld";
        assert_eq!(truncate_chars(text, 4), "héll");
        assert_eq!(truncate_chars(text, 100), text);
    }
}
