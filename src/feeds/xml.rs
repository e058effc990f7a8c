//! Text-level helpers for picking apart RSS documents.
//!
//! Items are moved between feeds verbatim, so these work on the raw markup
//! rather than a parsed tree: whatever namespaces, CDATA sections and
//! formatting an upstream feed uses survive the trip untouched.

use regex::{NoExpand, Regex, RegexBuilder};
use std::sync::LazyLock;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item\b[^>]*>.*?</item>").expect("a valid item pattern"));

static ITEM_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<item\b").expect("a valid item start pattern"));

static CHANNEL_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</channel>").expect("a valid channel end pattern"));

static ITEM_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</item>\s*$").expect("a valid item end pattern"));

fn tag_pattern(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("an escaped tag pattern is always valid")
}

/// Removes a `<![CDATA[...]]>` wrapper (and surrounding whitespace) if present.
pub fn strip_cdata(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix(CDATA_OPEN)
        .and_then(|t| t.strip_suffix(CDATA_CLOSE))
        .unwrap_or(text)
}

pub fn enc_cdata(text: &str) -> String {
    format!("{CDATA_OPEN}{text}{CDATA_CLOSE}")
}

/// Every `<item>...</item>` block in the document, in order.
pub fn find_items(xml: &str) -> Vec<&str> {
    ITEM_RE.find_iter(xml).map(|m| m.as_str()).collect()
}

/// The inner markup of the first `<tag>` element, or `""` if there is none.
pub fn find_tag_text<'a>(xml: &'a str, tag: &str) -> &'a str {
    let tag = regex::escape(tag);
    tag_pattern(&format!(r"<{tag}\b[^>]*>(.*?)</{tag}>"))
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

/// The value of `attr` on the first `<tag>` element carrying it, or `""`.
pub fn find_attr<'a>(xml: &'a str, tag: &str, attr: &str) -> &'a str {
    let tag = regex::escape(tag);
    let attr = regex::escape(attr);
    tag_pattern(&format!(r#"<{tag}\b[^>]*\b{attr}="([^"]+)"[^>]*/?>"#))
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default()
}

/// Replaces the first `<tag>` element's content with `content`, or appends a
/// new `<tag>` to the end of the item when it has none.
pub fn set_item_tag(item: &str, tag: &str, content: &str) -> String {
    let escaped = regex::escape(tag);
    let replacement = format!("<{tag}>{content}</{tag}>");

    let existing = tag_pattern(&format!(r"<{escaped}\b[^>]*>.*?</{escaped}>"));
    if existing.is_match(item) {
        return existing.replace(item, NoExpand(&replacement)).into_owned();
    }

    ITEM_END_RE
        .replace(item, NoExpand(&format!("{replacement}\n</item>")))
        .into_owned()
}

/// Inserts `items` ahead of the first existing `<item>`, or at the end of the
/// channel for feeds which have none yet.
pub fn insert_items(feed: &str, items: &[String]) -> String {
    let block = items.join("\n");

    if let Some(first) = ITEM_START_RE.find(feed) {
        let (head, tail) = feed.split_at(first.start());
        return format!("{head}{block}\n{tail}");
    }

    match CHANNEL_END_RE.find_iter(feed).last() {
        Some(end) => {
            let (head, tail) = feed.split_at(end.start());
            format!("{head}{block}\n{tail}")
        }
        None => format!("{feed}{block}\n"),
    }
}
