//! Expansion driver: seeds, claim loop, and the target-count cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::article::{Article, ExpansionState},
    },
};
use futures::{stream, StreamExt};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::pipeline::{ArticleProcessor, Prepared, ProcessOutcome};

use super::{
    link_discovery::LinkDiscovery,
    work_queue::{ClaimedArticle, QueueStats, WorkQueue},
};

#[derive(Debug, Clone)]
pub struct ExpansionOptions {
    pub max_depth: i64,
    pub batch_size: usize,
    pub claim_timeout_secs: i64,
    pub target_count: usize,
    pub max_iterations: Option<usize>,
    /// Concurrent fetch/extract slots per batch; 1 runs fully sequential.
    pub fetch_concurrency: usize,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            batch_size: 10,
            claim_timeout_secs: 300,
            target_count: 100,
            max_iterations: None,
            fetch_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExpansionReport {
    pub stats: QueueStats,
    pub iterations: usize,
    pub duration: Duration,
}

/// Coordinates the whole expansion: claims batches from the work queue,
/// runs the article pipeline, discovers links, and stops at the target
/// count of loaded articles.
pub struct ExpansionDriver {
    db: Arc<SurrealDbClient>,
    work_queue: WorkQueue,
    link_discovery: LinkDiscovery,
    processor: Arc<ArticleProcessor>,
    options: ExpansionOptions,
}

impl ExpansionDriver {
    pub fn new(
        db: Arc<SurrealDbClient>,
        processor: Arc<ArticleProcessor>,
        options: ExpansionOptions,
    ) -> Self {
        Self {
            work_queue: WorkQueue::new(db.clone()),
            link_discovery: LinkDiscovery::new(db.clone()),
            db,
            processor,
            options,
        }
    }

    /// Insert seed titles as `discovered` at depth 0. Existing titles are
    /// skipped so re-running a build script is harmless.
    pub async fn initialize_seeds(
        &self,
        seed_titles: &[String],
        category: &str,
    ) -> Result<usize, AppError> {
        let mut inserted = 0usize;
        for title in seed_titles {
            if Article::get_by_title(&self.db, title).await?.is_some() {
                warn!(title = %title, "Seed already exists, skipping");
                continue;
            }
            self.db
                .store_item(Article::new_discovered(
                    title,
                    Some(category.to_string()),
                    0,
                ))
                .await?;
            inserted += 1;
            info!(title = %title, "Initialized seed");
        }
        info!(count = inserted, "Seeds initialized");
        Ok(inserted)
    }

    /// Expand until `target_count` articles are loaded, the queue stalls,
    /// or the iteration cap is hit.
    pub async fn run(&self) -> Result<ExpansionReport, AppError> {
        info!(target = self.options.target_count, "Starting expansion");
        let start = Instant::now();
        let mut iteration = 0usize;

        loop {
            iteration += 1;

            if let Some(max) = self.options.max_iterations {
                if iteration > max {
                    warn!(max, "Max iterations reached");
                    break;
                }
            }

            let current = Article::loaded_count(&self.db).await?;
            info!(
                iteration,
                current,
                target = self.options.target_count,
                "Expansion progress"
            );
            if current >= self.options.target_count {
                info!(current, "Target reached");
                break;
            }

            // Crashed workers surface as stale claims; sweep periodically
            if iteration % 5 == 0 {
                let reclaimed = self
                    .work_queue
                    .reclaim_stale(self.options.claim_timeout_secs)
                    .await;
                if reclaimed > 0 {
                    info!(reclaimed, "Reclaimed stale claims");
                }
            }

            let batch = self.work_queue.claim_work(self.options.batch_size).await?;

            if batch.is_empty() {
                if self.link_discovery.discovered_count().await? == 0 {
                    warn!("No discovered articles remaining, expansion stalled");
                    break;
                }
                // Another worker holds claims; wait for progress or reclaim
                sleep(Duration::from_secs(2)).await;
                continue;
            }

            if self.options.fetch_concurrency > 1 {
                self.process_batch_parallel(batch).await?;
            } else {
                for claim in batch {
                    self.process_claim(&claim).await?;
                }
            }
        }

        let duration = start.elapsed();
        let stats = self.work_queue.queue_stats().await?;
        info!(?duration, iterations = iteration, ?stats, "Expansion complete");

        Ok(ExpansionReport {
            stats,
            iterations: iteration,
            duration,
        })
    }

    async fn process_claim(&self, claim: &ClaimedArticle) -> Result<(), AppError> {
        // Heartbeat before the slow fetch/LLM work
        self.work_queue.update_heartbeat(&claim.title).await;

        let outcome = self
            .processor
            .process_article(&claim.title, "General", claim.expansion_depth)
            .await;

        self.settle(claim, outcome).await
    }

    /// Fan out the network/LLM-bound prepare stage across the batch, then
    /// apply all graph writes from this single task in completion order.
    async fn process_batch_parallel(&self, batch: Vec<ClaimedArticle>) -> Result<(), AppError> {
        for claim in &batch {
            self.work_queue.update_heartbeat(&claim.title).await;
        }

        let prepared: Vec<(ClaimedArticle, Result<Prepared, AppError>)> =
            stream::iter(batch.into_iter().map(|claim| {
                let processor = Arc::clone(&self.processor);
                async move {
                    let result = processor
                        .prepare(&claim.title, "General", claim.expansion_depth)
                        .await;
                    (claim, result)
                }
            }))
            .buffer_unordered(self.options.fetch_concurrency)
            .collect()
            .await;

        for (claim, result) in prepared {
            let outcome = match result {
                Ok(Prepared::Stub) => ProcessOutcome {
                    success: true,
                    links: Vec::new(),
                    error: None,
                },
                Ok(Prepared::Ready(article)) => {
                    let links = article.article.links.clone();
                    match self.processor.write(*article).await {
                        Ok(()) => ProcessOutcome {
                            success: true,
                            links,
                            error: None,
                        },
                        Err(e) => ProcessOutcome {
                            success: false,
                            links: Vec::new(),
                            error: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => ProcessOutcome {
                    success: false,
                    links: Vec::new(),
                    error: Some(e.to_string()),
                },
            };

            self.settle(&claim, outcome).await?;
        }

        Ok(())
    }

    /// Apply queue bookkeeping for one finished article.
    async fn settle(&self, claim: &ClaimedArticle, outcome: ProcessOutcome) -> Result<(), AppError> {
        if outcome.success {
            self.work_queue
                .advance_state(&claim.title, ExpansionState::Loaded)
                .await?;

            if claim.expansion_depth < self.options.max_depth {
                let discovered = self
                    .link_discovery
                    .discover_links(
                        &claim.title,
                        &outcome.links,
                        claim.expansion_depth,
                        self.options.max_depth,
                    )
                    .await?;
                if discovered > 0 {
                    info!(title = %claim.title, discovered, "Discovered new articles");
                }
            }

            self.work_queue
                .advance_state(&claim.title, ExpansionState::Processed)
                .await?;
        } else {
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            self.work_queue.mark_failed(&claim.title, &error).await?;
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<QueueStats, AppError> {
        self.work_queue.queue_stats().await
    }
}
