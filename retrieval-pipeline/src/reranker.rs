//! Graph-aware reranking: degree centrality blended with vector scores,
//! and reciprocal rank fusion for combining rankings.

use std::collections::HashMap;
use std::sync::Arc;

use common::{error::AppError, storage::db::SurrealDbClient};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::semantic::SearchHit;

/// Standard RRF constant.
pub const RRF_K: f32 = 60.0;

/// Below this average of outgoing links per article the graph carries too
/// little signal and centrality is zeroed out.
const SPARSE_GRAPH_CUTOFF: f32 = 2.0;

pub struct Reranker {
    db: Arc<SurrealDbClient>,
    /// Cached density verdict; the graph does not change mid-session for
    /// a read-only pack.
    sparse: Mutex<Option<bool>>,
}

impl Reranker {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            db,
            sparse: Mutex::new(None),
        }
    }

    /// Average outgoing `links_to` edges per article; 0.0 on error or an
    /// empty graph.
    pub async fn graph_density(&self) -> f32 {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let result: Result<(i64, i64), AppError> = async {
            let links: Vec<Row> = self
                .db
                .query("SELECT count() AS count FROM links_to GROUP ALL")
                .await?
                .take(0)?;
            let articles: Vec<Row> = self
                .db
                .query("SELECT count() AS count FROM article GROUP ALL")
                .await?
                .take(0)?;
            Ok((
                links.first().map_or(0, |r| r.count),
                articles.first().map_or(0, |r| r.count),
            ))
        }
        .await;

        match result {
            Ok((_, 0)) => 0.0,
            Ok((links, articles)) => links as f32 / articles as f32,
            Err(e) => {
                warn!(error = %e, "Graph density check failed");
                0.0
            }
        }
    }

    /// Degree centrality (in + out) for the given titles, normalized by
    /// the maximum degree in the set. Titles missing from the graph score
    /// 0.0; empty input yields an empty map.
    pub async fn calculate_centrality(
        &self,
        titles: &[String],
    ) -> Result<HashMap<String, f32>, AppError> {
        if titles.is_empty() {
            return Ok(HashMap::new());
        }

        #[derive(Deserialize)]
        struct Row {
            title: String,
            out_degree: i64,
            in_degree: i64,
        }

        let rows: Vec<Row> = self
            .db
            .query(
                "SELECT title,
                        array::len(->links_to->article) AS out_degree,
                        array::len(<-links_to<-article) AS in_degree
                 FROM article WHERE title IN $titles",
            )
            .bind(("titles", titles.to_vec()))
            .await?
            .take(0)?;

        let mut centrality: HashMap<String, f32> =
            titles.iter().map(|t| (t.clone(), 0.0)).collect();

        let max_degree = rows
            .iter()
            .map(|r| r.out_degree + r.in_degree)
            .max()
            .unwrap_or(0);

        if max_degree > 0 {
            for row in rows {
                let degree = (row.out_degree + row.in_degree) as f32;
                centrality.insert(row.title, degree / max_degree as f32);
            }
        }

        Ok(centrality)
    }

    /// Blend vector similarity with graph centrality:
    /// `score = similarity * vector_weight + centrality * graph_weight`.
    ///
    /// Weights must be non-negative and sum to 1 within 0.001. On a sparse
    /// graph the centrality contribution is zeroed, which preserves the
    /// incoming vector order.
    pub async fn rerank(
        &self,
        results: Vec<SearchHit>,
        vector_weight: f32,
        graph_weight: f32,
    ) -> Result<Vec<SearchHit>, AppError> {
        if vector_weight < 0.0 || graph_weight < 0.0 {
            return Err(AppError::Validation(
                "Rerank weights must be non-negative".to_string(),
            ));
        }
        if (vector_weight + graph_weight - 1.0).abs() > 0.001 {
            return Err(AppError::Validation(format!(
                "Rerank weights must sum to 1.0, got {}",
                vector_weight + graph_weight
            )));
        }

        if results.is_empty() {
            return Ok(results);
        }

        let sparse = self.is_sparse().await;
        let titles: Vec<String> = results.iter().map(|r| r.title.clone()).collect();
        let centrality = if sparse {
            HashMap::new()
        } else {
            self.calculate_centrality(&titles).await?
        };

        let mut reranked: Vec<SearchHit> = results
            .into_iter()
            .map(|mut hit| {
                let central = centrality.get(&hit.title).copied().unwrap_or(0.0);
                hit.similarity = hit.similarity * vector_weight + central * graph_weight;
                hit
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.title.cmp(&b.title))
        });

        Ok(reranked)
    }

    async fn is_sparse(&self) -> bool {
        let mut cached = self.sparse.lock().await;
        if let Some(verdict) = *cached {
            return verdict;
        }
        let density = self.graph_density().await;
        let verdict = density < SPARSE_GRAPH_CUTOFF;
        if verdict {
            warn!(density, "Sparse graph, disabling centrality component");
        } else {
            debug!(density, "Graph dense enough for centrality reranking");
        }
        *cached = Some(verdict);
        verdict
    }
}

/// Reciprocal rank fusion of the original vector ranking (weight 1.0) with
/// a centrality ranking (weight 0.5): `score += w / (k + rank)`.
///
/// Adaptive guard: the fused ranking is only adopted when the original top
/// result survives in the fused top 3, so strong matches are never demoted
/// by a noisy graph signal.
pub fn fuse_rankings(original: &[String], by_centrality: &[String]) -> Vec<String> {
    if original.is_empty() {
        return Vec::new();
    }

    let mut scores: HashMap<&str, f32> = HashMap::new();
    for (rank, title) in original.iter().take(10).enumerate() {
        *scores.entry(title.as_str()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
    }
    for (rank, title) in by_centrality.iter().enumerate() {
        *scores.entry(title.as_str()).or_insert(0.0) += 0.5 / (RRF_K + rank as f32);
    }

    let mut fused: Vec<(&str, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    let fused_titles: Vec<String> = fused.into_iter().take(5).map(|(t, _)| t.to_string()).collect();

    let top = &original[0];
    if fused_titles.iter().take(3).any(|t| t == top) {
        fused_titles
    } else {
        debug!("Rank fusion would demote the top result, keeping original ranking");
        original.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{index_article, setup_db};
    use common::storage::types::article::Article;

    fn hit(title: &str, similarity: f32) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            similarity,
            distance: 1.0 - similarity,
        }
    }

    #[tokio::test]
    async fn test_centrality_empty_input() {
        let db = setup_db().await;
        let reranker = Reranker::new(db);
        assert!(reranker
            .calculate_centrality(&[])
            .await
            .expect("centrality")
            .is_empty());
    }

    #[tokio::test]
    async fn test_centrality_monotone_in_degree_and_bounded() {
        let db = setup_db().await;
        for title in ["Hub", "Leaf", "Mid", "X", "Y"] {
            index_article(&db, title, vec![1.0, 0.0, 0.0]).await;
        }
        // Hub links to three articles, Mid to one, Leaf to none
        for target in ["Leaf", "Mid", "X"] {
            Article::create_link(&db, "Hub", target, "internal")
                .await
                .expect("link");
        }
        Article::create_link(&db, "Mid", "Y", "internal")
            .await
            .expect("link");

        let reranker = Reranker::new(db);
        let titles: Vec<String> = ["Hub", "Mid", "Leaf", "Ghost"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let centrality = reranker
            .calculate_centrality(&titles)
            .await
            .expect("centrality");

        for (title, score) in &centrality {
            assert!((0.0..=1.0).contains(score), "{title}: {score}");
        }
        assert!((centrality["Hub"] - 1.0).abs() < f32::EPSILON);
        assert!(centrality["Hub"] > centrality["Mid"]);
        assert!(centrality["Mid"] > centrality["Leaf"]);
        assert_eq!(centrality["Ghost"], 0.0);
    }

    #[tokio::test]
    async fn test_rerank_weight_validation() {
        let db = setup_db().await;
        let reranker = Reranker::new(db);

        assert!(reranker.rerank(vec![], -0.1, 1.1).await.is_err());
        assert!(reranker.rerank(vec![], 0.5, 0.4).await.is_err());
        assert!(reranker.rerank(vec![], 0.6, 0.4).await.is_ok());
    }

    #[tokio::test]
    async fn test_rerank_pure_vector_preserves_order() {
        let db = setup_db().await;
        let reranker = Reranker::new(db);

        let results = vec![hit("A", 0.9), hit("B", 0.7), hit("C", 0.5)];
        let reranked = reranker
            .rerank(results, 1.0, 0.0)
            .await
            .expect("rerank");

        let titles: Vec<&str> = reranked.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_sparse_graph_zeroes_centrality() {
        let db = setup_db().await;
        // Two articles, one link: density 0.5, well under the cutoff
        index_article(&db, "A", vec![1.0, 0.0, 0.0]).await;
        index_article(&db, "B", vec![0.0, 1.0, 0.0]).await;
        Article::create_link(&db, "A", "B", "internal")
            .await
            .expect("link");

        let reranker = Reranker::new(db);
        let reranked = reranker
            .rerank(vec![hit("B", 0.9), hit("A", 0.8)], 0.6, 0.4)
            .await
            .expect("rerank");

        // With centrality zeroed the vector order stands
        assert_eq!(reranked[0].title, "B");
        assert!((reranked[0].similarity - 0.9 * 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_rankings_keeps_strong_top() {
        let original = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let centrality = vec!["B".to_string(), "A".to_string(), "C".to_string()];

        let fused = fuse_rankings(&original, &centrality);
        assert!(fused.iter().take(3).any(|t| t == "A"));
    }

    #[test]
    fn test_fuse_rankings_reverts_when_top_demoted() {
        let original = vec!["A".to_string()];
        // Heavy centrality signal for unrelated titles cannot push A out:
        // fused ranking must either keep A near the top or be discarded
        let centrality: Vec<String> = (0..10).map(|i| format!("Z{i}")).collect();

        let fused = fuse_rankings(&original, &centrality);
        assert!(fused.iter().take(3).any(|t| t == "A"));
    }

    #[test]
    fn test_fuse_rankings_empty_original() {
        assert!(fuse_rankings(&[], &["X".to_string()]).is_empty());
    }
}
