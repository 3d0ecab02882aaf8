//! Link discovery: turns outgoing links into newly discovered articles
//! and `links_to` edges, bounded by the expansion depth.

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::article::Article},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Namespace prefixes that are never expanded (case-insensitive).
const INVALID_PREFIXES: &[&str] = &[
    "wikipedia:",
    "help:",
    "template:",
    "file:",
    "image:",
    "category:",
    "portal:",
    "talk:",
    "user:",
    "mediawiki:",
    "special:",
    "draft:",
    "module:",
    "book:",
    "timedtext:",
];

pub struct LinkDiscovery {
    db: Arc<SurrealDbClient>,
}

impl LinkDiscovery {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Whether a link target is a real article worth expanding. Filters
    /// namespace pages, list pages, and disambiguation pages.
    pub fn is_valid_link(title: &str) -> bool {
        if title.len() < 2 {
            return false;
        }

        let lower = title.to_lowercase();
        if INVALID_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            return false;
        }

        if title.starts_with("List of ") {
            return false;
        }

        !title.contains("(disambiguation)")
    }

    /// Process a source article's links: create edges to known articles
    /// and insert unknown ones as `discovered` one level deeper. Returns
    /// the number of newly inserted articles.
    ///
    /// Existence and prior-edge checks are batched into one query each;
    /// link lists commonly run to hundreds of entries per article.
    pub async fn discover_links(
        &self,
        source_title: &str,
        links: &[String],
        current_depth: i64,
        max_depth: i64,
    ) -> Result<usize, AppError> {
        if current_depth >= max_depth {
            debug!(
                source = source_title,
                current_depth, max_depth, "At max depth, skipping link discovery"
            );
            return Ok(0);
        }

        let next_depth = current_depth + 1;
        let valid_links: Vec<String> = links
            .iter()
            .filter(|l| Self::is_valid_link(l))
            .cloned()
            .collect();

        debug!(
            source = source_title,
            valid = valid_links.len(),
            total = links.len(),
            "Processing links"
        );

        let existing_articles = Article::batch_states(&self.db, &valid_links).await?;
        let existing_links = Article::existing_link_targets(&self.db, source_title).await?;

        let mut new_articles = 0usize;
        for link in &valid_links {
            let result = async {
                if existing_articles.contains_key(link.as_str()) {
                    // Known article: only the edge may be missing
                    if !existing_links.contains(link.as_str()) {
                        Article::create_link(&self.db, source_title, link, "internal").await?;
                    }
                } else {
                    // New article: insert as discovered, then link.
                    // A duplicate-key failure means another worker won the
                    // discovery race; the edge is still created.
                    match self
                        .db
                        .store_item(Article::new_discovered(link, None, next_depth))
                        .await
                    {
                        Ok(_) => {
                            new_articles += 1;
                            debug!(link = %link, depth = next_depth, "Discovered new article");
                        }
                        Err(e) => {
                            debug!(link = %link, error = %e, "Insert race for discovered article");
                        }
                    }
                    if !existing_links.contains(link.as_str()) {
                        Article::create_link(&self.db, source_title, link, "internal").await?;
                    }
                }
                Ok::<_, AppError>(())
            }
            .await;

            if let Err(e) = result {
                warn!(link = %link, error = %e, "Failed to process link");
            }
        }

        info!(
            source = source_title,
            new_articles, next_depth, "Link discovery complete"
        );

        Ok(new_articles)
    }

    /// Count of articles waiting to be processed.
    pub async fn discovered_count(&self) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let rows: Vec<Row> = self
            .db
            .query(
                "SELECT count() AS count FROM article
                 WHERE expansion_state = 'discovered' GROUP ALL",
            )
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |r| r.count.max(0) as usize))
    }
}
