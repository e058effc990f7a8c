//! Rebuilds episode descriptions as readable HTML.
//!
//! Upstream descriptions arrive as anything from plain text with bare URLs to
//! fully formed HTML. Well-formed blocks (lists, links, code) are kept as-is,
//! everything else is split into paragraphs, numbered or bulleted lists are
//! detected, and bare URLs and email addresses become links.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::xml::{enc_cdata, strip_cdata};

static PROTECTED_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    // Lists go first so that links inside them stay part of the list.
    ["ol", "ul", "a", "pre", "code"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}>"))
                .expect("a valid protected block pattern")
        })
        .collect()
});

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[BLOCK(\d+)\]\]").expect("a valid token pattern"));

static PARAGRAPH_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</p\s*>").expect("a valid paragraph end pattern"));

static PARAGRAPH_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p\b[^>]*>").expect("a valid paragraph start pattern"));

static LINE_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("a valid line break pattern"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^>\w@])([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})")
        .expect("a valid email pattern")
});

static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)((?:href|src)=")?(https?://[^\s<>"']+\.(?:jpg|jpeg|png|gif|webp)(?:\?[^\s<>"']*)?)"#,
    )
    .expect("a valid image url pattern")
});

static LINK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:href|src)=")?(https?://[^\s<>"']+)"#).expect("a valid link pattern")
});

static ORDERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*[).\-]\s+(.*)$").expect("a valid ordered item pattern"));

static UNORDERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s+(.*)$").expect("a valid unordered item pattern"));

/// Builds the CDATA-wrapped HTML description for an episode: a heading with
/// the title, the episode artwork linking to the episode, a separator and
/// then the reformatted body.
pub fn rebuild_description(title: &str, link: &str, image: &str, description: &str) -> String {
    let mut html = String::new();
    if !title.is_empty() {
        html.push_str(&format!("<h3>{title}</h3>\n"));
    }
    if !image.is_empty() && !link.is_empty() {
        html.push_str(&format!(r#"<a href="{link}"><img src="{image}" /></a>"#));
        html.push('\n');
    }
    html.push_str(r#"<hr style="border:0;border-top:1px dashed #ccc;margin:20px 0;" />"#);
    html.push('\n');

    let (body, blocks) = protect_blocks(strip_cdata(description));

    let body = PARAGRAPH_END_RE.replace_all(&body, "\n");
    let body = PARAGRAPH_START_RE.replace_all(&body, "");
    let body = LINE_BREAK_RE.replace_all(&body, "\n");
    let body = TOKEN_RE.replace_all(&body, "\n$0\n");

    let rebuilt = format_lines(&body.lines().collect::<Vec<_>>());
    html.push_str(&restore_blocks(&rebuilt, &blocks));

    enc_cdata(&html)
}

/// Swaps blocks which are already well-formed HTML for `[[BLOCKn]]` tokens.
fn protect_blocks(html: &str) -> (String, Vec<String>) {
    let mut blocks = Vec::new();
    let mut text = html.to_string();

    for pattern in PROTECTED_BLOCKS.iter() {
        text = pattern
            .replace_all(&text, |caps: &Captures| {
                blocks.push(caps[0].to_string());
                format!("[[BLOCK{}]]", blocks.len() - 1)
            })
            .into_owned();
    }

    (text, blocks)
}

fn restore_blocks(text: &str, blocks: &[String]) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|idx| blocks.get(idx))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Turns bare email addresses and URLs into links, and image URLs into
/// linked images. URLs already inside an `href` or `src` are left alone.
fn linkify(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, r#"$1<a href="mailto:$2">$2</a>"#);

    let text = IMAGE_URL_RE.replace_all(&text, |caps: &Captures| {
        if caps.get(1).is_some() {
            return caps[0].to_string();
        }

        let url = &caps[2];
        format!(r#"<a href="{url}"><img src="{url}" /></a>"#)
    });

    LINK_URL_RE
        .replace_all(&text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }

            let url = &caps[2];
            format!(r#"<a href="{url}">{url}</a>"#)
        })
        .into_owned()
}

/// Collects consecutive list items (blank lines between items are allowed).
fn collect_list(
    lines: &[&str],
    mut i: usize,
    pattern: &Regex,
    group: usize,
) -> (Vec<String>, usize) {
    let mut items = Vec::new();
    while let Some(line) = lines.get(i).map(|l| l.trim()) {
        if line.is_empty() {
            i += 1;
            continue;
        }

        let Some(caps) = pattern.captures(line) else {
            break;
        };

        items.push(format!("<li>{}</li>", linkify(&caps[group])));
        i += 1;
    }

    (items, i)
}

fn format_lines(lines: &[&str]) -> String {
    let mut out = Vec::new();
    let mut i = 0;

    while let Some(line) = lines.get(i).map(|l| l.trim()) {
        if TOKEN_RE.find(line).is_some_and(|m| m.as_str() == line) {
            out.push(line.to_string());
            i += 1;
            continue;
        }

        if let Some(start) = ORDERED_ITEM_RE.captures(line).map(|c| c[1].to_string()) {
            let (items, next) = collect_list(lines, i, &ORDERED_ITEM_RE, 2);
            out.push(format!(r#"<ol start="{start}">{}</ol>"#, items.concat()));
            i = next;
            continue;
        }

        if UNORDERED_ITEM_RE.is_match(line) {
            let (items, next) = collect_list(lines, i, &UNORDERED_ITEM_RE, 1);
            out.push(format!("<ul>{}</ul>", items.concat()));
            i = next;
            continue;
        }

        if !line.is_empty() {
            out.push(format!("<p>{}</p>", linkify(line)));
        }
        i += 1;
    }

    out.join("\n")
}
