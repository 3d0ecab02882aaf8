//! Wikipedia Action API content source (`action=parse` endpoint).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::{wikitext, ContentSource, ParsedSection, SourceArticle, SourceError, SourceType};

const BASE_URL: &str = "https://en.wikipedia.org/w/api.php";
const USER_AGENT: &str = "lorepack/1.0 (knowledge pack builder)";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    parse: Option<ParseData>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParseData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    wikitext: Option<WikitextBody>,
    #[serde(default)]
    links: Vec<ApiLink>,
    #[serde(default)]
    categories: Vec<ApiCategory>,
}

#[derive(Debug, Deserialize)]
struct WikitextBody {
    #[serde(rename = "*")]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiLink {
    ns: i64,
    #[serde(rename = "*")]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiCategory {
    #[serde(rename = "*")]
    name: String,
}

/// Client for the Wikipedia Action API with rate limiting and bounded
/// exponential-backoff retries on 429 and server errors.
pub struct WikipediaSource {
    client: reqwest::Client,
    base_url: String,
    rate_limit_delay: Duration,
    max_retries: u32,
    last_request: Mutex<Option<Instant>>,
}

impl WikipediaSource {
    pub fn new(rate_limit_ms: u64, max_retries: u32, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: BASE_URL.to_string(),
            rate_limit_delay: Duration::from_millis(rate_limit_ms),
            max_retries,
            last_request: Mutex::new(None),
        }
    }

    /// Point the client at a different API endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Ensure the minimum inter-request delay has elapsed.
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

    async fn make_request(&self, title: &str) -> Result<ApiResponse, SourceError> {
        let params = [
            ("action", "parse"),
            ("page", title),
            ("prop", "wikitext|links|categories"),
            ("format", "json"),
        ];

        let mut attempt: u32 = 0;
        loop {
            self.enforce_rate_limit().await;

            let result = self
                .client
                .get(&self.base_url)
                .query(&params)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 404 {
                        return Err(SourceError::NotFound(format!("Article not found: {title}")));
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            let backoff = self.rate_limit_delay * 2u32.saturating_pow(attempt);
                            warn!(title, attempt, ?backoff, "Rate limited, backing off");
                            sleep(backoff).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(SourceError::RateLimited(format!(
                            "Rate limit exceeded after {} retries",
                            self.max_retries
                        )));
                    }

                    if status.is_server_error() {
                        if attempt < self.max_retries {
                            let backoff = Duration::from_secs(1) * 2u32.saturating_pow(attempt);
                            warn!(title, attempt, %status, "Server error, backing off");
                            sleep(backoff).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(SourceError::Http(format!(
                            "Server error {status} after {} retries",
                            self.max_retries
                        )));
                    }

                    if !status.is_success() {
                        return Err(SourceError::Http(format!("Unexpected status {status}")));
                    }

                    return response
                        .json::<ApiResponse>()
                        .await
                        .map_err(|e| SourceError::Http(format!("Malformed API response: {e}")));
                }
                Err(e) if e.is_timeout() => {
                    if attempt < self.max_retries {
                        let backoff = Duration::from_secs(1) * 2u32.saturating_pow(attempt);
                        warn!(title, attempt, "Request timeout, backing off");
                        sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::Http(format!(
                        "Request timeout after {} retries",
                        self.max_retries
                    )));
                }
                Err(e) => return Err(SourceError::Http(format!("Request failed: {e}"))),
            }
        }
    }
}

#[async_trait]
impl ContentSource for WikipediaSource {
    async fn fetch_article(&self, title_or_url: &str) -> Result<SourceArticle, SourceError> {
        let data = self.make_request(title_or_url).await?;

        if let Some(error) = data.error {
            if error.code == "missingtitle" {
                return Err(SourceError::NotFound(format!(
                    "Article '{title_or_url}' not found"
                )));
            }
            return Err(SourceError::Http(format!(
                "API error: {}",
                error.info.unwrap_or_else(|| error.code.clone())
            )));
        }

        let parse = data
            .parse
            .ok_or_else(|| SourceError::Http("Unexpected API response format".to_string()))?;

        let content = parse.wikitext.map(|w| w.content).unwrap_or_default();

        // Main namespace only; talk/file/template links are never expanded
        let links: Vec<String> = parse
            .links
            .into_iter()
            .filter(|l| l.ns == 0)
            .map(|l| l.title)
            .collect();

        let categories: Vec<String> = parse.categories.into_iter().map(|c| c.name).collect();

        let title = parse.title.unwrap_or_else(|| title_or_url.to_string());
        debug!(
            title,
            chars = content.len(),
            links = links.len(),
            "Fetched wikipedia article"
        );

        Ok(SourceArticle {
            source_url: format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_")),
            title,
            content,
            links,
            categories,
            source_type: SourceType::Wikipedia,
        })
    }

    fn parse_sections(&self, content: &str) -> Vec<ParsedSection> {
        wikitext::parse_sections(content)
    }

    fn get_links(&self, content: &str) -> Vec<String> {
        wikitext::extract_wikilinks(content)
    }

    fn source_type(&self) -> SourceType {
        SourceType::Wikipedia
    }
}
