//! Transport clean-up of raw model text.
//!
//! Models wrap JSON in Markdown fences, answer with CRLF line endings or
//! prepend a BOM even when told not to. These rules only undo transport
//! noise; they never change the content the validators look at.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Apply every clean-up rule in order.
pub fn clean(input: &str) -> String {
    let text = normalise_line_endings(input);
    let text = remove_invisible_chars(&text);
    strip_code_fences(text.trim()).trim().to_string()
}

/// Remove one pair of Markdown fences (```` ```json ```` or bare) wrapping the whole text.
pub fn strip_code_fences(input: &str) -> &str {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps.get(1).map_or(input, |m| m.as_str()),
        None => input,
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn strips_bare_fences() {
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
    }

    #[test]
    fn leaves_unfenced_text() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("yes"), "yes");
    }

    #[test]
    fn clean_handles_crlf_and_bom() {
        let raw = "\u{FEFF}```json\r\n{\"a\": 1}\r\n```\r\n";
        assert_eq!(clean(raw), "{\"a\": 1}");
    }
}
