//! Generic web content source for documentation sites.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use dom_smoothie::{Config, Readability, TextMode};
use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use url::Url;

use super::{url_guard, ContentSource, ParsedSection, SourceArticle, SourceError, SourceType};

const USER_AGENT: &str = "lorepack/1.0 (knowledge pack builder)";

/// Sections shorter than this after conversion are dropped.
const MIN_SECTION_CHARS: usize = 100;

static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid heading pattern"));

static BLOCK_STRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|nav|footer|header)[^>]*>.*?</(script|style|nav|footer|header)>")
        .expect("valid block-strip pattern")
});

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid url pattern"));

static TITLE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[|\u{2013}\u{2014}]\s*").expect("valid suffix pattern"));

/// Content source for arbitrary web pages. Fetches HTML, converts it to
/// markdown-like prose, and keeps only same-domain links for expansion.
pub struct WebSource {
    client: reqwest::Client,
    rate_limit_delay: Duration,
    min_word_count: usize,
    last_request: Mutex<Option<Instant>>,
}

impl WebSource {
    pub fn new(rate_limit_ms: u64, timeout_secs: u64, min_word_count: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            rate_limit_delay: Duration::from_millis(rate_limit_ms),
            min_word_count,
            last_request: Mutex::new(None),
        }
    }

    async fn enforce_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.rate_limit_delay {
                sleep(self.rate_limit_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Page title from `<title>`, with site suffixes after `|`/`–`/`—`
    /// removed; falls back to the last URL path segment.
    fn extract_title(html: &str, url: &Url) -> String {
        let document = Html::parse_document(html);
        if let Ok(selector) = Selector::parse("title") {
            if let Some(element) = document.select(&selector).next() {
                let raw = element.text().collect::<String>();
                let raw = raw.trim();
                if !raw.is_empty() {
                    if let Some(first) = TITLE_SUFFIX.split(raw).next() {
                        let cleaned = first.trim();
                        if !cleaned.is_empty() {
                            return cleaned.to_string();
                        }
                    }
                }
            }
        }

        let segment = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default();
        segment.replace(['-', '_'], " ").trim().to_string()
    }

    /// Absolute same-domain links from `<a href>`, deduplicated in order.
    fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let Ok(absolute) = base_url.join(href) else {
                continue;
            };
            if absolute.host_str() != base_url.host_str() {
                continue;
            }
            let link = absolute.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
        links
    }

    /// Categories inferred from up to three URL path segments.
    fn infer_categories(url: &Url) -> Vec<String> {
        let skip = ["en", "us", "docs", "index", "learn"];
        url.path_segments()
            .map(|segments| {
                segments
                    .filter(|s| s.len() > 2)
                    .take(3)
                    .map(|s| {
                        s.replace(['-', '_'], " ")
                            .split_whitespace()
                            .map(|w| {
                                let mut chars = w.chars();
                                match chars.next() {
                                    Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                                    None => String::new(),
                                }
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .filter(|c| !skip.contains(&c.to_lowercase().as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Readability-based HTML to markdown conversion, with a tag-stripping
    /// fallback for pages the readability pass cannot handle.
    fn html_to_markdown(html: &str) -> String {
        let config = Config {
            text_mode: TextMode::Markdown,
            ..Default::default()
        };
        match Readability::new(html.to_string(), None, Some(config))
            .and_then(|mut r| r.parse())
        {
            Ok(article) => article.text_content.trim().to_string(),
            Err(e) => {
                debug!(error = %e, "Readability failed, using fallback conversion");
                Self::fallback_markdown(html)
            }
        }
    }

    fn fallback_markdown(html: &str) -> String {
        let text = BLOCK_STRIP.replace_all(html, " ");
        let text = HTML_TAG.replace_all(&text, " ");
        let mut out = String::with_capacity(text.len());
        let mut last_blank = true;
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if !last_blank {
                    out.push('\n');
                    last_blank = true;
                }
            } else {
                out.push_str(&trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
                out.push('\n');
                last_blank = false;
            }
        }
        out.trim().to_string()
    }
}

#[async_trait]
impl ContentSource for WebSource {
    async fn fetch_article(&self, title_or_url: &str) -> Result<SourceArticle, SourceError> {
        // Validate at submission time
        let url = url_guard::validate_url(title_or_url).await?;

        self.enforce_rate_limit().await;

        // Re-validate immediately before the request so a DNS change
        // between submission and fetch cannot point us inward
        let url = url_guard::validate_url(url.as_str()).await?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::NotFound(format!("Failed to fetch {url}: {e}")))?;

        if response.status().as_u16() == 404 {
            return Err(SourceError::NotFound(format!("Page not found: {url}")));
        }
        if !response.status().is_success() {
            return Err(SourceError::NotFound(format!(
                "Failed to fetch {url}: status {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Http(format!("Failed to read body from {url}: {e}")))?;

        let title = Self::extract_title(&html, &url);
        let markdown = Self::html_to_markdown(&html);
        let links = Self::extract_links(&html, &url);
        let categories = Self::infer_categories(&url);

        let word_count = markdown.split_whitespace().count();
        if word_count < self.min_word_count {
            warn!(%url, word_count, "Rejecting thin page");
            return Err(SourceError::NotFound(format!(
                "Thin content at {url}: {word_count} words"
            )));
        }

        debug!(%url, title = %title, chars = markdown.len(), links = links.len(), "Fetched web page");

        Ok(SourceArticle {
            title,
            content: markdown,
            links,
            categories,
            source_url: url.to_string(),
            source_type: SourceType::Web,
        })
    }

    fn parse_sections(&self, content: &str) -> Vec<ParsedSection> {
        let mut sections = Vec::new();
        let mut current_title = String::new();
        let mut current_level: i64 = 0;
        let mut current_lines: Vec<&str> = Vec::new();

        let flush = |title: &str, level: i64, lines: &[&str], out: &mut Vec<ParsedSection>| {
            let text = lines.join("\n").trim().to_string();
            if text.len() >= MIN_SECTION_CHARS {
                out.push(ParsedSection {
                    title: if title.is_empty() {
                        "Introduction".to_string()
                    } else {
                        title.to_string()
                    },
                    content: text,
                    level: if level == 0 { 2 } else { level },
                });
            }
        };

        for line in content.lines() {
            if let Some(caps) = MD_HEADING.captures(line) {
                flush(&current_title, current_level, &current_lines, &mut sections);
                current_level = caps.get(1).map_or(2, |m| m.len() as i64);
                current_title = caps.get(2).map_or(String::new(), |m| m.as_str().trim().to_string());
                current_lines.clear();
            } else {
                current_lines.push(line);
            }
        }
        flush(&current_title, current_level, &current_lines, &mut sections);

        sections
    }

    fn get_links(&self, content: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        BARE_URL
            .find_iter(content)
            .filter_map(|m| {
                let link = m.as_str().to_string();
                seen.insert(link.clone()).then_some(link)
            })
            .collect()
    }

    fn source_type(&self) -> SourceType {
        SourceType::Web
    }
}
