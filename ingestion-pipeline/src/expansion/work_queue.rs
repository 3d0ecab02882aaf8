//! Claim-based work distribution over the article table.
//!
//! State transitions:
//!     discovered -> claimed -> loaded -> processed (success path)
//!     discovered -> claimed -> failed (after max retries)
//!     claimed -> discovered (timeout reclaim or retry)
//!
//! Claims are soft leases: a worker that stops heartbeating loses its
//! claim to the next reclamation pass. Every transition is guarded by a
//! conditional update on the predecessor state, so racing workers lose
//! quietly instead of double-processing.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::article::{Article, ExpansionState},
    },
    utils::sanitize::sanitize_error,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// An article claimed for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedArticle {
    pub title: String,
    pub expansion_depth: i64,
    pub claimed_at: DateTime<Utc>,
}

/// Per-state queue counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub discovered: usize,
    pub claimed: usize,
    pub loaded: usize,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
}

pub struct WorkQueue {
    db: Arc<SurrealDbClient>,
    max_retries: i64,
}

impl WorkQueue {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            db,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Claim up to `batch_size` discovered articles, seeds (lowest depth)
    /// first. Each claim is a conditional update guarded on the article
    /// still being `discovered`; losers of a race are silently dropped.
    pub async fn claim_work(&self, batch_size: usize) -> Result<Vec<ClaimedArticle>, AppError> {
        #[derive(Deserialize)]
        struct CandidateRow {
            title: String,
            expansion_depth: i64,
        }

        let now = Utc::now();

        let candidates: Vec<CandidateRow> = self
            .db
            .query(format!(
                "SELECT title, expansion_depth FROM article
                 WHERE expansion_state = 'discovered'
                 ORDER BY expansion_depth ASC
                 LIMIT {batch_size}"
            ))
            .await?
            .take(0)?;

        if candidates.is_empty() {
            debug!("No work available to claim");
            return Ok(Vec::new());
        }

        let mut claimed = Vec::new();
        for candidate in candidates {
            // Guarded update: if another worker claimed this article since
            // the SELECT above, the WHERE fails and RETURN AFTER is empty
            let result: Result<Vec<Article>, _> = async {
                Ok::<_, AppError>(
                    self.db
                        .query(
                            "UPDATE type::thing('article', $title)
                             SET expansion_state = 'claimed', claimed_at = $now, updated_at = $now
                             WHERE expansion_state = 'discovered'
                             RETURN AFTER",
                        )
                        .bind(("title", candidate.title.clone()))
                        .bind(("now", surrealdb::sql::Datetime::from(now)))
                        .await?
                        .take(0)?,
                )
            }
            .await;

            match result {
                Ok(rows) if rows.is_empty() => {
                    debug!(title = %candidate.title, "Claim lost race");
                }
                Ok(_) => {
                    debug!(
                        title = %candidate.title,
                        depth = candidate.expansion_depth,
                        "Claimed article"
                    );
                    claimed.push(ClaimedArticle {
                        title: candidate.title,
                        expansion_depth: candidate.expansion_depth,
                        claimed_at: now,
                    });
                }
                Err(e) => {
                    warn!(title = %candidate.title, error = %e, "Failed to claim article");
                }
            }
        }

        info!(count = claimed.len(), "Claimed articles for processing");
        Ok(claimed)
    }

    /// Reset the claim timestamp while an article is being worked on.
    /// A no-op for articles not in `claimed`. Errors are logged, never
    /// propagated: a missed heartbeat only risks an early reclaim.
    pub async fn update_heartbeat(&self, title: &str) {
        let now = Utc::now();
        let result = self
            .db
            .query(
                "UPDATE type::thing('article', $title)
                 SET claimed_at = $now, updated_at = $now
                 WHERE expansion_state = 'claimed'",
            )
            .bind(("title", title.to_string()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await;

        match result {
            Ok(_) => debug!(title, "Updated heartbeat"),
            Err(e) => warn!(title, error = %e, "Failed to update heartbeat"),
        }
    }

    /// Return every stale claim (no heartbeat within the timeout) to
    /// `discovered`. Returns the number reclaimed; errors yield 0 so the
    /// driver loop keeps running.
    pub async fn reclaim_stale(&self, timeout_secs: i64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds(timeout_secs);

        let result: Result<Vec<Article>, AppError> = async {
            Ok(self
                .db
                .query(
                    "UPDATE article
                     SET expansion_state = 'discovered', claimed_at = NONE
                     WHERE expansion_state = 'claimed' AND claimed_at < $cutoff
                     RETURN AFTER",
                )
                .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
                .await?
                .take(0)?)
        }
        .await;

        match result {
            Ok(rows) => {
                if rows.is_empty() {
                    debug!("No stale claims to reclaim");
                } else {
                    info!(count = rows.len(), "Reclaimed stale claims");
                }
                rows.len()
            }
            Err(e) => {
                error!(error = %e, "Error reclaiming stale claims");
                0
            }
        }
    }

    /// Advance an article along the state machine. The transition only
    /// fires from a legal predecessor state; anything else is a silent
    /// no-op in the store.
    pub async fn advance_state(
        &self,
        title: &str,
        new_state: ExpansionState,
    ) -> Result<(), AppError> {
        let predecessors: &[ExpansionState] = match new_state {
            ExpansionState::Claimed => &[ExpansionState::Discovered],
            ExpansionState::Loaded => &[ExpansionState::Claimed],
            ExpansionState::Processed => &[ExpansionState::Loaded, ExpansionState::Claimed],
            ExpansionState::Failed => &[ExpansionState::Claimed, ExpansionState::Discovered],
            // retry/reclaim path
            ExpansionState::Discovered => &[ExpansionState::Claimed, ExpansionState::Failed],
        };

        let now = Utc::now();
        self.db
            .query(
                "UPDATE type::thing('article', $title)
                 SET expansion_state = $new_state, processed_at = $now, updated_at = $now
                 WHERE expansion_state IN $predecessors",
            )
            .bind(("title", title.to_string()))
            .bind(("new_state", new_state))
            .bind(("predecessors", predecessors.to_vec()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .check()?;

        info!(title, state = %new_state, "Advanced article state");
        Ok(())
    }

    /// Record a processing failure. Below the retry budget the article
    /// returns to `discovered`; at the budget it becomes terminally
    /// `failed`. The error text is sanitized and logged, never persisted.
    pub async fn mark_failed(&self, title: &str, error_msg: &str) -> Result<(), AppError> {
        let Some(article) = Article::get_by_title(&self.db, title).await? else {
            warn!(title, "Article not found while marking failed");
            return Ok(());
        };

        let new_retry_count = article.retry_count + 1;
        let sanitized = sanitize_error(error_msg);

        if new_retry_count >= self.max_retries {
            let now = Utc::now();
            self.db
                .query(
                    "UPDATE type::thing('article', $title)
                     SET retry_count = $retry_count,
                         expansion_state = 'failed',
                         processed_at = $now,
                         updated_at = $now",
                )
                .bind(("title", title.to_string()))
                .bind(("retry_count", new_retry_count))
                .bind(("now", surrealdb::sql::Datetime::from(now)))
                .await?
                .check()?;
            error!(
                title,
                retries = new_retry_count,
                error = %sanitized,
                "Article failed terminally"
            );
        } else {
            self.db
                .query(
                    "UPDATE type::thing('article', $title)
                     SET retry_count = $retry_count,
                         expansion_state = 'discovered',
                         claimed_at = NONE",
                )
                .bind(("title", title.to_string()))
                .bind(("retry_count", new_retry_count))
                .await?
                .check()?;
            warn!(
                title,
                retry = new_retry_count,
                max = self.max_retries,
                error = %sanitized,
                "Article returned to queue for retry"
            );
        }

        Ok(())
    }

    /// Queue counts by state. Store errors propagate: monitoring must not
    /// silently report zeros.
    pub async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        #[derive(Deserialize)]
        struct Row {
            expansion_state: ExpansionState,
            count: i64,
        }

        let rows: Vec<Row> = self
            .db
            .query(
                "SELECT expansion_state, count() AS count FROM article
                 GROUP BY expansion_state",
            )
            .await?
            .take(0)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let count = row.count.max(0) as usize;
            match row.expansion_state {
                ExpansionState::Discovered => stats.discovered = count,
                ExpansionState::Claimed => stats.claimed = count,
                ExpansionState::Loaded => stats.loaded = count,
                ExpansionState::Processed => stats.processed = count,
                ExpansionState::Failed => stats.failed = count,
            }
            stats.total += count;
        }

        Ok(stats)
    }
}
