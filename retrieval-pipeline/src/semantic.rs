//! Semantic search over article sections.

use std::collections::HashMap;
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::section::Section},
    utils::embedding::Embedder,
};
use tracing::{debug, info};

/// One article-level hit from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub similarity: f32,
    pub distance: f32,
}

/// Search sections by meaning and aggregate to articles.
///
/// When the query is itself an indexed article title, that article's
/// lead-section embedding is reused directly (fast path, no model call).
/// Otherwise the query is embedded on the fly. The injected embedder is
/// reused across calls; it is only invoked for free-text queries.
pub async fn semantic_search(
    db: &Arc<SurrealDbClient>,
    embedder: &Arc<dyn Embedder>,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, AppError> {
    if !(1..=500).contains(&top_k) {
        return Err(AppError::Validation(format!(
            "top_k must be between 1 and 500, got {top_k}"
        )));
    }

    let query_embedding = match Section::lead_embedding(db, query).await? {
        Some(embedding) => embedding,
        None => {
            info!(query, "No article with this title, embedding query text");
            embedder.embed(query).await?
        }
    };

    // Over-fetch sections, then keep the best section per article
    let hits = Section::vector_search(db, query_embedding, top_k * 3).await?;
    debug!(sections = hits.len(), "Vector index returned sections");

    let mut best: HashMap<String, SearchHit> = HashMap::new();
    for hit in hits {
        let title = Section::article_of(&hit.section_id).to_string();
        let entry = best.entry(title.clone()).or_insert_with(|| SearchHit {
            title,
            similarity: (1.0 - hit.distance).clamp(0.0, 1.0),
            distance: hit.distance,
        });
        if hit.distance < entry.distance {
            entry.distance = hit.distance;
            entry.similarity = (1.0 - hit.distance).clamp(0.0, 1.0);
        }
    }

    let mut results: Vec<SearchHit> = best.into_values().collect();
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
    });
    results.truncate(top_k);

    Ok(results)
}
