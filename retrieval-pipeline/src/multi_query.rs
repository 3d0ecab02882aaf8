//! Multi-query retrieval: paraphrase the question with a fast model and
//! merge the per-query vector results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{error::AppError, storage::db::SurrealDbClient, utils::embedding::Embedder};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    llm::{strip_code_fences, ChatModel},
    semantic::{semantic_search, SearchHit},
};

/// Hard ceiling on the paraphrase call; past this the expansion is not
/// worth the latency.
const EXPANSION_TIMEOUT: Duration = Duration::from_secs(10);

const EXPANSION_SYSTEM: &str =
    "You rephrase search queries. Respond with a JSON array of strings and nothing else.";

/// Retrieve with the original question plus two paraphrases, keeping the
/// highest similarity per title. Any expansion failure (timeout, API
/// error, malformed JSON) silently degrades to a single search over the
/// original question.
pub async fn multi_query_retrieve(
    db: &Arc<SurrealDbClient>,
    embedder: &Arc<dyn Embedder>,
    chat: &Arc<dyn ChatModel>,
    fast_model: &str,
    question: &str,
    max_results: usize,
) -> Result<Vec<SearchHit>, AppError> {
    let alternatives = expand_question(chat, fast_model, question).await;

    let mut queries = vec![question.to_string()];
    queries.extend(alternatives);

    let mut best: HashMap<String, SearchHit> = HashMap::new();
    for query in &queries {
        let hits = semantic_search(db, embedder, query, max_results).await?;
        for hit in hits {
            match best.get_mut(&hit.title) {
                Some(existing) if existing.similarity >= hit.similarity => {}
                _ => {
                    best.insert(hit.title.clone(), hit);
                }
            }
        }
    }

    let mut merged: Vec<SearchHit> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
    });
    merged.truncate(max_results);

    Ok(merged)
}

/// Ask the fast model for two paraphrases. Empty on any failure.
async fn expand_question(chat: &Arc<dyn ChatModel>, fast_model: &str, question: &str) -> Vec<String> {
    let prompt = format!(
        "Rephrase this search query in 2 different ways that preserve its meaning.\n\
         Return ONLY a JSON array of 2 strings.\n\n\
         Query: {question}"
    );

    let response = match timeout(
        EXPANSION_TIMEOUT,
        chat.complete(fast_model, EXPANSION_SYSTEM, &prompt),
    )
    .await
    {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "Query expansion failed, searching original only");
            return Vec::new();
        }
        Err(_) => {
            warn!("Query expansion timed out, searching original only");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<String>>(strip_code_fences(&response)) {
        Ok(alternatives) => {
            debug!(count = alternatives.len(), "Generated query paraphrases");
            alternatives.into_iter().take(2).collect()
        }
        Err(e) => {
            warn!(error = %e, "Paraphrase JSON parse failed, searching original only");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{index_article, setup_db, CountingEmbedder, StubChat};

    #[tokio::test]
    async fn test_merges_results_across_paraphrases() {
        let db = setup_db().await;
        index_article(&db, "Close Match", vec![1.0, 0.0, 0.0]).await;
        index_article(&db, "Other Topic", vec![0.0, 1.0, 0.0]).await;

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        let chat = StubChat::replying(r#"["alternative one", "alternative two"]"#);

        let results = multi_query_retrieve(
            &db,
            &embedder.as_dyn(),
            &chat.as_dyn(),
            "fast-model",
            "original question",
            5,
        )
        .await
        .expect("retrieve");

        // Three searches ran: the original plus both paraphrases
        assert_eq!(embedder.calls(), 3);
        assert!(!results.is_empty());
        assert_eq!(results[0].title, "Close Match");
        // Sorted descending
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_api_error_falls_back_to_single_search() {
        let db = setup_db().await;
        index_article(&db, "Only Article", vec![1.0, 0.0, 0.0]).await;

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        let chat = StubChat::failing("rate limited");

        let results = multi_query_retrieve(
            &db,
            &embedder.as_dyn(),
            &chat.as_dyn(),
            "fast-model",
            "the question",
            5,
        )
        .await
        .expect("retrieve");

        // Exactly one search over the original question
        assert_eq!(embedder.calls(), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Only Article");
    }

    #[tokio::test]
    async fn test_hanging_expansion_falls_back_to_single_search() {
        let db = setup_db().await;
        index_article(&db, "Only Article", vec![1.0, 0.0, 0.0]).await;

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        // Far beyond the expansion timeout; tokio auto-advances test time
        let chat = StubChat::hanging(Duration::from_secs(3600));

        tokio::time::pause();
        let results = multi_query_retrieve(
            &db,
            &embedder.as_dyn(),
            &chat.as_dyn(),
            "fast-model",
            "the question",
            5,
        )
        .await
        .expect("retrieve");
        tokio::time::resume();

        assert_eq!(embedder.calls(), 1);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_paraphrase_json_falls_back() {
        let db = setup_db().await;
        index_article(&db, "Only Article", vec![1.0, 0.0, 0.0]).await;

        let embedder = CountingEmbedder::shared(vec![1.0, 0.0, 0.0]);
        let chat = StubChat::replying("here are some ideas: 1) ... 2) ...");

        let results = multi_query_retrieve(
            &db,
            &embedder.as_dyn(),
            &chat.as_dyn(),
            "fast-model",
            "the question",
            5,
        )
        .await
        .expect("retrieve");

        assert_eq!(embedder.calls(), 1);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_keeps_highest_similarity_per_title() {
        let db = setup_db().await;
        index_article(&db, "Doc", vec![1.0, 0.0, 0.0]).await;

        // Different embeddings per call: the original question is close,
        // the paraphrases are farther away
        let embedder = CountingEmbedder::sequence(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ]);
        let chat = StubChat::replying(r#"["alt a", "alt b"]"#);

        let results = multi_query_retrieve(
            &db,
            &embedder.as_dyn(),
            &chat.as_dyn(),
            "fast-model",
            "free text question",
            5,
        )
        .await
        .expect("retrieve");

        assert_eq!(results.len(), 1);
        assert!(
            results[0].similarity > 0.9,
            "highest similarity retained: {}",
            results[0].similarity
        );
    }
}
