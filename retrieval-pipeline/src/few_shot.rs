//! Few-shot exemplar selection by embedding similarity.

use std::path::Path;
use std::sync::Arc;

use common::{
    error::AppError,
    utils::embedding::{cosine_similarity, Embedder},
};
use serde::Deserialize;
use tracing::info;

/// Guard against pathological example files.
const MAX_EXAMPLES: usize = 1000;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FewShotExample {
    #[serde(alias = "query")]
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredExample {
    pub example: FewShotExample,
    pub score: f32,
}

/// Loads question/answer exemplars and serves the most similar ones for a
/// query. Example embeddings are computed once at load time and reused
/// for every lookup.
pub struct FewShotManager {
    examples: Vec<FewShotExample>,
    embeddings: Vec<Vec<f32>>,
}

impl FewShotManager {
    /// Load examples from a JSON array or JSONL file and precompute their
    /// embeddings.
    pub async fn load(path: &Path, embedder: &Arc<dyn Embedder>) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::NotFound(format!("Examples file {}: {e}", path.display())))?;
        let examples = parse_examples(&content)?;

        let questions: Vec<String> = examples.iter().map(|e| e.question.clone()).collect();
        let embeddings = embedder.embed_batch(&questions).await?;

        info!(count = examples.len(), path = %path.display(), "Loaded few-shot examples");
        Ok(Self {
            examples,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// The `k` examples most similar to the query, descending, with a
    /// stable order for ties.
    pub async fn find_similar(
        &self,
        embedder: &Arc<dyn Embedder>,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredExample>, AppError> {
        if k == 0 || self.examples.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = embedder.embed(query).await?;

        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&query_embedding, e)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .filter_map(|(i, score)| {
                self.examples.get(i).map(|example| ScoredExample {
                    example: example.clone(),
                    score,
                })
            })
            .collect())
    }
}

/// Parse a JSON array or line-delimited JSON objects.
fn parse_examples(content: &str) -> Result<Vec<FewShotExample>, AppError> {
    let trimmed = content.trim();
    let examples: Vec<FewShotExample> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    };

    if examples.len() > MAX_EXAMPLES {
        return Err(AppError::Validation(format!(
            "Too many few-shot examples: {} (max {MAX_EXAMPLES})",
            examples.len()
        )));
    }

    Ok(examples)
}
