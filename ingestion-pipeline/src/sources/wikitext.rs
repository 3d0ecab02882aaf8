//! Wikitext section parsing and markup stripping.

use std::sync::LazyLock;

use regex::Regex;

use super::ParsedSection;

/// Sections shorter than this after stripping are discarded as noise
/// (navigation stubs, "See also" lists, etc.).
const MIN_SECTION_CHARS: usize = 100;

// H2/H3 headings: == Title == or === Title ===. The regex crate has no
// backreferences, so the open/close runs are matched separately and their
// lengths compared in code.
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(={2,3})\s*([^=\n][^\n]*?)\s*(={2,3})\s*$").expect("valid heading pattern")
});

static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));

// Innermost {{template}} bodies; applied to a fixed point to peel nesting.
static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^{}]*\}\}").expect("valid template pattern"));

static REF_WITH_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<ref[^>]*>.*?</ref>").expect("valid ref pattern"));

static REF_SELF_CLOSING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<ref[^/>]*/?>").expect("valid self-closing ref pattern"));

static FILE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[(File|Image):[^\]]+\]\]").expect("valid file link pattern")
});

static PIPED_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^\]|]+\|([^\]]+)\]\]").expect("valid piped link pattern"));

static SIMPLE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid simple link pattern"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

static MULTI_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid newline pattern"));

static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +").expect("valid space pattern"));

// Wikilink targets, for extracting links out of raw wikitext.
static WIKILINK_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|#]+)(?:\|[^\]]*)?\]\]").expect("valid wikilink pattern"));

static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*#REDIRECT\s*\[\[([^\]|#]+)").expect("valid redirect pattern")
});

/// Extract H2/H3 sections from wikitext, stripping markup and dropping
/// sections under the minimum length.
pub fn parse_sections(wikitext: &str) -> Vec<ParsedSection> {
    struct Heading {
        level: i64,
        title: String,
        content_start: usize,
        heading_start: usize,
    }

    let headings: Vec<Heading> = HEADING
        .captures_iter(wikitext)
        .filter_map(|caps| {
            let open = caps.get(1)?;
            let close = caps.get(3)?;
            // Mismatched runs like "== Title ===" are not headings
            if open.len() != close.len() {
                return None;
            }
            let whole = caps.get(0)?;
            Some(Heading {
                level: open.len() as i64,
                title: caps.get(2)?.as_str().trim().to_string(),
                content_start: whole.end(),
                heading_start: whole.start(),
            })
        })
        .collect();

    let mut sections = Vec::with_capacity(headings.len());
    for (i, heading) in headings.iter().enumerate() {
        let end = headings
            .get(i + 1)
            .map_or(wikitext.len(), |next| next.heading_start);
        let raw = wikitext
            .get(heading.content_start..end)
            .unwrap_or_default()
            .trim();
        let content = strip_wikitext(raw);
        if content.len() >= MIN_SECTION_CHARS {
            sections.push(ParsedSection {
                title: heading.title.clone(),
                content,
                level: heading.level,
            });
        }
    }

    sections
}

/// Remove wikitext formatting, leaving plain prose.
pub fn strip_wikitext(text: &str) -> String {
    let mut text = HTML_COMMENT.replace_all(text, "").into_owned();

    // Peel templates inside-out until no more change (nesting)
    loop {
        let stripped = TEMPLATE.replace_all(&text, " ").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }

    let text = REF_WITH_BODY.replace_all(&text, "");
    let text = REF_SELF_CLOSING.replace_all(&text, "");
    let text = FILE_LINK.replace_all(&text, "");
    let text = PIPED_LINK.replace_all(&text, "$1");
    let text = SIMPLE_LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = MULTI_NEWLINE.replace_all(&text, "\n");
    let text = MULTI_SPACE.replace_all(&text, " ");

    text.trim().to_string()
}

/// Wikilink targets appearing in the text, excluding file/image links,
/// order-preserving and deduplicated.
pub fn extract_wikilinks(wikitext: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    WIKILINK_TARGET
        .captures_iter(wikitext)
        .filter_map(|caps| {
            let target = caps.get(1)?.as_str().trim();
            let lower = target.to_lowercase();
            if lower.starts_with("file:") || lower.starts_with("image:") {
                return None;
            }
            if target.is_empty() || !seen.insert(target.to_string()) {
                return None;
            }
            Some(target.to_string())
        })
        .collect()
}

/// The redirect target when content is a `#REDIRECT [[target]]` stub.
pub fn redirect_target(content: &str) -> Option<String> {
    REDIRECT
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
