// src/links.rs
//! Link codec: swaps HTML anchors for opaque `[LINK]` markers before translation
//! and puts them back afterwards as `text (url)`.
//!
//! Translation models happily mangle markup and URLs, so the body that goes out
//! for translation carries only plain text plus markers. The extracted tokens are
//! kept aside in encounter order and consumed front-to-back on restore.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker substituted for each anchor.
pub const PLACEHOLDER: &str = "[LINK]";

/// One hyperlink lifted out of a content body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub display_text: String,
    pub target_url: String,
}

/// Output of [`extract`]: placeholder text plus the ordered link table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub text: String,
    pub tokens: Vec<LinkToken>,
}

// `<a ... href="url" ...>text</a>`. The text part refuses anything that opens or
// closes another anchor, so an unterminated `<a>` can never swallow the next link.
fn anchor_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)<a\s(?:[^>]*?\s)?href\s*=\s*(?:"([^"]+)"|'([^']+)')[^>]*>((?:[^<]|<[^aA/]|<[aA][^\s>]|</[^aA]|</[aA][^\s>])*?)</a\s*>"#,
        )
        .expect("anchor regex")
    })
}

// Models sometimes change case or pad the marker; accept those variants on restore.
fn marker_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[\s*link\s*\]").expect("marker regex"))
}

/// Stands in for the `[` of marker-lookalikes already present in the source
/// text, so only markers produced by [`extract`] are consumed on restore.
/// A literal occurrence of this character is doubled.
const ESCAPE: char = '\u{E000}';

fn escape_lookalikes(text: &str, out: &mut String) {
    let mut last = 0;
    for m in marker_re().find_iter(text) {
        push_doubling_escape(&text[last..m.start()], out);
        out.push(ESCAPE);
        // skip the opening bracket
        push_doubling_escape(&m.as_str()[1..], out);
        last = m.end();
    }
    push_doubling_escape(&text[last..], out);
}

fn push_doubling_escape(text: &str, out: &mut String) {
    for c in text.chars() {
        if c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn unescape(text: &str, out: &mut String) {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
        } else if chars.peek() == Some(&ESCAPE) {
            chars.next();
            out.push(ESCAPE);
        } else {
            out.push('[');
        }
    }
}

/// Replace every well-formed anchor with [`PLACEHOLDER`], collecting the links in
/// left-to-right order. Text outside anchors is copied verbatim, except that
/// marker-lookalikes are escaped (see [`restore`]).
pub fn extract(markup: &str) -> Extracted {
    let mut tokens = Vec::new();
    let mut text = String::with_capacity(markup.len());
    let mut last = 0;
    for caps in anchor_re().captures_iter(markup) {
        let Some(whole) = caps.get(0) else { continue };
        let url = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let display = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        escape_lookalikes(&markup[last..whole.start()], &mut text);
        text.push_str(PLACEHOLDER);
        tokens.push(LinkToken {
            display_text: display.to_string(),
            target_url: url.to_string(),
        });
        last = whole.end();
    }
    escape_lookalikes(&markup[last..], &mut text);

    Extracted { text, tokens }
}

/// Replace markers with `display_text (target_url)`, consuming `tokens` in order,
/// and undo the escaping [`extract`] applied to pre-existing lookalikes.
///
/// Markers left over once the tokens run out are dropped rather than shown as
/// literal `[LINK]`; tokens left over once the markers run out are discarded.
pub fn restore(text: &str, tokens: &[LinkToken]) -> String {
    let mut next = tokens.iter();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in marker_re().find_iter(text) {
        unescape(&text[last..m.start()], &mut out);
        if let Some(t) = next.next() {
            out.push_str(&t.display_text);
            out.push_str(" (");
            out.push_str(&t.target_url);
            out.push(')');
        }
        last = m.end();
    }
    unescape(&text[last..], &mut out);
    out
}

/// Number of markers in `text` (as recognised by [`restore`]).
pub fn placeholder_count(text: &str) -> usize {
    marker_re().find_iter(text).count()
}
