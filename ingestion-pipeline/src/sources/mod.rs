pub mod url_guard;
pub mod web;
pub mod wikipedia;
pub mod wikitext;

use async_trait::async_trait;
use common::error::AppError;
use thiserror::Error;

/// Where an article came from. Drives redirect handling and link semantics
/// (titles for Wikipedia, absolute URLs for the web).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Wikipedia,
    Web,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Wikipedia => "wikipedia",
            SourceType::Web => "web",
        }
    }
}

/// Source-agnostic article representation returned by every content source.
#[derive(Debug, Clone)]
pub struct SourceArticle {
    pub title: String,
    pub content: String,
    pub links: Vec<String>,
    pub categories: Vec<String>,
    pub source_url: String,
    pub source_type: SourceType,
}

/// One heading-delimited slice of an article.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    pub title: String,
    pub content: String,
    pub level: i64,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Article not found: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Invalid source URL: {0}")]
    Invalid(String),
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(msg) => AppError::NotFound(msg),
            SourceError::Invalid(msg) => AppError::Security(msg),
            other => AppError::Processing(other.to_string()),
        }
    }
}

/// Pluggable content source: fetch an article, split it into sections,
/// extract outgoing links.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch by title (Wikipedia) or URL (web).
    async fn fetch_article(&self, title_or_url: &str) -> Result<SourceArticle, SourceError>;

    /// Split raw article content into heading-delimited sections.
    fn parse_sections(&self, content: &str) -> Vec<ParsedSection>;

    /// Extract outgoing link targets from raw article content.
    fn get_links(&self, content: &str) -> Vec<String>;

    fn source_type(&self) -> SourceType;
}
