//! Hybrid retrieval: weighted fusion of vector, graph-neighborhood, and
//! keyword signals.

use std::collections::HashMap;
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::fact::Fact},
    utils::embedding::Embedder,
};
use serde::Deserialize;
use surrealdb::RecordId;
use tracing::debug;

use crate::{config::HybridWeights, semantic::semantic_search};

/// Combined retrieval output with per-article fused scores.
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub sources: Vec<String>,
    pub facts: Vec<String>,
    pub scored: Vec<(String, f32)>,
}

/// Fuse three signals into one ranking:
/// - vector similarity (weight 0.5 by default),
/// - one-hop graph neighbors of the top vector hits (weight 0.3 × 0.5),
/// - keyword matches in titles (weight 0.2 × 0.7 per keyword).
///
/// Individual signal failures are logged and skipped; the fusion works
/// with whatever signals arrived.
pub async fn hybrid_retrieve(
    db: &Arc<SurrealDbClient>,
    embedder: &Arc<dyn Embedder>,
    question: &str,
    max_results: usize,
    weights: HybridWeights,
) -> Result<HybridResults, AppError> {
    let mut scored: HashMap<String, f32> = HashMap::new();

    // Signal 1: vector similarity
    match semantic_search(db, embedder, question, max_results).await {
        Ok(hits) => {
            for hit in hits {
                *scored.entry(hit.title).or_insert(0.0) += weights.vector * hit.similarity;
            }
        }
        Err(e) => debug!(error = %e, "Vector signal failed in hybrid retrieve"),
    }

    // Signal 2: one-hop neighbors of the top vector hits
    let mut seeds: Vec<(String, f32)> = scored.iter().map(|(t, s)| (t.clone(), *s)).collect();
    seeds.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (seed, _) in seeds.into_iter().take(3) {
        match outgoing_links(db, &seed, max_results).await {
            Ok(neighbors) => {
                for neighbor in neighbors {
                    *scored.entry(neighbor).or_insert(0.0) += weights.graph * 0.5;
                }
            }
            Err(e) => debug!(seed = %seed, error = %e, "Graph signal failed"),
        }
    }

    // Signal 3: keyword matches in article titles
    let keywords: Vec<&str> = question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() > 3)
        .take(3)
        .collect();
    for keyword in keywords {
        match titles_containing(db, keyword, max_results).await {
            Ok(titles) => {
                for title in titles {
                    *scored.entry(title).or_insert(0.0) += weights.keyword * 0.7;
                }
            }
            Err(e) => debug!(keyword, error = %e, "Keyword signal failed"),
        }
    }

    let mut ranked: Vec<(String, f32)> = scored.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(max_results);

    let sources: Vec<String> = ranked.iter().map(|(t, _)| t.clone()).collect();

    // Facts for the strongest sources enrich the synthesis context
    let mut facts = Vec::new();
    for title in sources.iter().take(5) {
        match Fact::for_article(db, title, 3).await {
            Ok(article_facts) => facts.extend(article_facts),
            Err(e) => debug!(title = %title, error = %e, "Fact fetch failed"),
        }
    }

    Ok(HybridResults {
        sources,
        facts,
        scored: ranked,
    })
}

/// Outgoing `links_to` neighbors of one article.
pub(crate) async fn outgoing_links(
    db: &SurrealDbClient,
    title: &str,
    limit: usize,
) -> Result<Vec<String>, AppError> {
    #[derive(Deserialize)]
    struct Row {
        title: Option<String>,
    }

    let rows: Vec<Row> = db
        .query(format!(
            "SELECT out.title AS title FROM links_to WHERE in = $source LIMIT {limit}"
        ))
        .bind(("source", RecordId::from_table_key("article", title)))
        .await?
        .take(0)?;

    Ok(rows.into_iter().filter_map(|r| r.title).collect())
}

/// Case-insensitive title-contains lookup.
pub(crate) async fn titles_containing(
    db: &SurrealDbClient,
    needle: &str,
    limit: usize,
) -> Result<Vec<String>, AppError> {
    #[derive(Deserialize)]
    struct Row {
        title: String,
    }

    let rows: Vec<Row> = db
        .query(format!(
            "SELECT title FROM article
             WHERE string::contains(string::lowercase(title), string::lowercase($needle))
             LIMIT {limit}"
        ))
        .bind(("needle", needle.to_string()))
        .await?
        .take(0)?;

    Ok(rows.into_iter().map(|r| r.title).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{index_article, setup_db, CountingEmbedder};
    use common::storage::types::article::Article;

    #[tokio::test]
    async fn test_hybrid_combines_signals() {
        let db = setup_db().await;
        index_article(&db, "Machine learning", vec![1.0, 0.0, 0.0]).await;
        index_article(&db, "Neural network", vec![0.6, 0.8, 0.0]).await;
        Article::create_link(&db, "Machine learning", "Neural network", "internal")
            .await
            .expect("link");

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        let results = hybrid_retrieve(
            &db,
            &embedder.as_dyn(),
            "machine learning systems",
            10,
            HybridWeights::default(),
        )
        .await
        .expect("hybrid");

        assert_eq!(results.sources[0], "Machine learning");
        // Neighbor picked up through the graph signal
        assert!(results.sources.contains(&"Neural network".to_string()));

        let ml_score = results
            .scored
            .iter()
            .find(|(t, _)| t == "Machine learning")
            .map(|(_, s)| *s)
            .expect("scored");
        // Vector + keyword signals both hit the top article
        assert!(ml_score > 0.5, "score: {ml_score}");
    }

    #[tokio::test]
    async fn test_hybrid_includes_facts_for_top_sources() {
        let db = setup_db().await;
        index_article(&db, "Machine learning", vec![1.0, 0.0, 0.0]).await;
        Fact::upsert_and_link(
            &db,
            "Machine learning",
            Fact::new("Machine learning", 0, "Coined in 1959.".to_string()),
        )
        .await
        .expect("fact");

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        let results = hybrid_retrieve(
            &db,
            &embedder.as_dyn(),
            "machine learning",
            10,
            HybridWeights::default(),
        )
        .await
        .expect("hybrid");

        assert_eq!(results.facts, vec!["Coined in 1959.".to_string()]);
    }

    #[tokio::test]
    async fn test_titles_containing_case_insensitive() {
        let db = setup_db().await;
        index_article(&db, "Machine learning", vec![1.0, 0.0, 0.0]).await;

        let titles = titles_containing(&db, "MACHINE", 5).await.expect("lookup");
        assert_eq!(titles, vec!["Machine learning".to_string()]);
    }
}
