//! Deny-list cleanup applied to every message before it is stored, plus the
//! output encoders renderers apply on the way out.
//!
//! Stripping is a minimum layer. Stored text is still plain text and must be
//! encoded for whatever context renders it ([`escape_html`],
//! [`escape_terminal`]).

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::constants::TRUNCATION_MARKER;

static SCRIPT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("script pattern")
});

static FRAME_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<\s*(?:iframe|frameset|frame|object|embed)\b[^>]*>.*?<\s*/\s*(?:iframe|frameset|frame|object|embed)\s*>",
    )
    .expect("frame pattern")
});

// Unpaired opening or closing tags, including one cut off before its `>`.
static DANGLING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(?:script|iframe|frameset|frame|object|embed)\b[^>]*>?")
        .expect("dangling tag pattern")
});

static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(^|[^\w-])on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#)
        .expect("event handler pattern")
});

fn strip_once(text: &str) -> String {
    let text = SCRIPT_ELEMENT.replace_all(text, "");
    let text = FRAME_ELEMENT.replace_all(&text, "");
    let text = DANGLING_TAG.replace_all(&text, "");
    EVENT_HANDLER.replace_all(&text, "${1}").into_owned()
}

/// Remove script elements, embedded frames, and inline event handlers.
///
/// Runs until nothing changes so that fragments separated by a stripped
/// element cannot join into a new one.
pub fn strip_markup(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Cut `text` to at most `max_chars` characters, marker included.
///
/// Cuts fall on grapheme boundaries. Returns the input unchanged when it
/// already fits.
pub fn truncate_content(text: &str, max_chars: usize) -> Cow<'_, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    let (budget, marker) = if max_chars > marker_chars {
        (max_chars - marker_chars, TRUNCATION_MARKER)
    } else {
        (max_chars, "")
    };

    let mut kept = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let width = grapheme.chars().count();
        if used + width > budget {
            break;
        }
        kept.push_str(grapheme);
        used += width;
    }
    kept.push_str(marker);
    Cow::Owned(kept)
}

/// Strip then cap: the single path every stored message goes through.
pub fn sanitize_message(text: &str, max_chars: usize) -> String {
    let stripped = strip_markup(text);
    truncate_content(&stripped, max_chars).into_owned()
}

/// Encode `text` for an HTML text or quoted-attribute context.
pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Encode `text` for a terminal: control characters other than newline and
/// tab become U+FFFD so stored content cannot emit escape sequences.
pub fn escape_terminal(text: &str) -> Cow<'_, str> {
    let is_unsafe = |c: char| c.is_control() && c != '\n' && c != '\t';
    if !text.chars().any(is_unsafe) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| if is_unsafe(c) { char::REPLACEMENT_CHARACTER } else { c })
            .collect(),
    )
}
