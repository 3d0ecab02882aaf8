//! Answer synthesis: assembles grounded context from retrieval results
//! and asks the LLM for a final answer.

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::section::Section},
};
use tracing::warn;

use crate::few_shot::ScoredExample;
use crate::llm::ChatModel;
use crate::quality::{score_section_quality, CONTENT_QUALITY_THRESHOLD};
use crate::KgResults;

const SYNTHESIS_SYSTEM: &str =
    "You answer questions from knowledge graph retrieval results, grounded in the source text.";

/// Per-article grounding text is truncated to keep the prompt bounded.
const SOURCE_TEXT_LIMIT: usize = 500;

/// Lead-section text for the source articles, quality-filtered against the
/// question. With no question (bulk fetches), nothing is filtered.
pub async fn fetch_source_text(
    db: &Arc<SurrealDbClient>,
    titles: &[String],
    question: Option<&str>,
    quality_threshold: f32,
) -> Result<String, AppError> {
    let contents = Section::lead_contents(db, titles).await?;

    let mut parts = Vec::new();
    for (title, content) in contents {
        if let Some(question) = question {
            if score_section_quality(&content, question) < quality_threshold {
                continue;
            }
        }
        let mut cut = SOURCE_TEXT_LIMIT.min(content.len());
        while cut < content.len() && !content.is_char_boundary(cut) {
            cut += 1;
        }
        let truncated = if cut < content.len() {
            format!("{}...", content.get(..cut).unwrap_or(&content))
        } else {
            content
        };
        parts.push(format!("## {title}\n{truncated}"));
    }

    Ok(parts.join("\n\n"))
}

/// Build the synthesis prompt: query type, sources, entities, facts,
/// grounding text, and optional few-shot exemplars.
pub fn build_context(
    question: &str,
    results: &KgResults,
    query_type: &str,
    source_text: &str,
    few_shot: &[ScoredExample],
) -> String {
    let mut few_shot_section = String::new();
    if !few_shot.is_empty() {
        few_shot_section.push_str("Here are similar questions and their answers:\n\n");
        for (i, scored) in few_shot.iter().take(3).enumerate() {
            few_shot_section.push_str(&format!(
                "Example {}:\nQ: {}\nA: {}\n\n",
                i + 1,
                scored.example.question,
                scored.example.answer
            ));
        }
    }

    let entities: Vec<String> = results
        .entities
        .iter()
        .take(10)
        .map(|e| format!("{} ({})", e.name, e.entity_type))
        .collect();

    let facts: Vec<String> = results
        .facts
        .iter()
        .take(10)
        .map(|f| format!("- {f}"))
        .collect();

    let mut context = format!(
        "Query Type: {query_type}\n\nSources: {}\n\nEntities found: {}\n\nFacts:\n{}\n",
        results.sources.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
        entities.join(", "),
        facts.join("\n"),
    );

    if !source_text.is_empty() {
        context.push_str(&format!("\nOriginal Article Text (for grounding):\n{source_text}\n"));
    }

    format!(
        "{few_shot_section}Using the knowledge graph results AND original article text below, \
         answer this question concisely and accurately.\n\n\
         Question: {question}\n\n\
         Knowledge Graph Results:\n{context}\n\
         Provide a clear, factual answer grounded in the source text. Cite specific articles. \
         If the results contain no relevant data, say so."
    )
}

/// Synthesize the final answer. LLM failure degrades to a fixed template
/// listing the sources; a retrieval-level error is surfaced as text.
pub async fn synthesize_answer(
    db: &Arc<SurrealDbClient>,
    chat: &Arc<dyn ChatModel>,
    model: &str,
    question: &str,
    results: &KgResults,
    query_type: &str,
    few_shot: &[ScoredExample],
    quality_threshold: f32,
) -> String {
    if let Some(error) = &results.error {
        return format!("Query execution failed: {error}");
    }

    let sources: Vec<String> = results.sources.iter().take(5).cloned().collect();
    let source_text =
        match fetch_source_text(db, &sources, Some(question), quality_threshold).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to fetch source text for grounding");
            String::new()
        }
    };

    let prompt = build_context(question, results, query_type, &source_text, few_shot);

    match chat.complete(model, SYNTHESIS_SYSTEM, &prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Synthesis failed, returning source list");
            if sources.is_empty() {
                "No results found.".to_string()
            } else {
                format!("Found relevant sources: {}", sources.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::few_shot::FewShotExample;
    use crate::quality::CONTENT_QUALITY_THRESHOLD;
    use crate::test_support::{index_article_with_content, setup_db, StubChat};

    fn results_with(sources: &[&str]) -> KgResults {
        KgResults {
            sources: sources.iter().map(|s| (*s).to_string()).collect(),
            ..KgResults::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_source_text_filters_stubs_when_question_present() {
        let db = setup_db().await;
        index_article_with_content(&db, "Stub Article", "Tiny.", vec![1.0, 0.0, 0.0]).await;
        let long = "machine learning appears in this long body ".repeat(10);
        index_article_with_content(&db, "Real Article", &long, vec![0.0, 1.0, 0.0]).await;

        let titles = vec!["Stub Article".to_string(), "Real Article".to_string()];
        let filtered = fetch_source_text(&db, &titles, Some("machine learning"), CONTENT_QUALITY_THRESHOLD)
            .await
            .expect("fetch");
        assert!(filtered.contains("Real Article"));
        assert!(!filtered.contains("Stub Article"));

        // No question, no filtering
        let unfiltered = fetch_source_text(&db, &titles, None, CONTENT_QUALITY_THRESHOLD)
            .await
            .expect("fetch");
        assert!(unfiltered.contains("Stub Article"));
        assert!(unfiltered.contains("Real Article"));
    }

    #[tokio::test]
    async fn test_fetch_source_text_truncates_long_sections() {
        let db = setup_db().await;
        let long = "neural network details repeated many times here ".repeat(40);
        index_article_with_content(&db, "Long Article", &long, vec![1.0, 0.0, 0.0]).await;

        let text = fetch_source_text(&db, &["Long Article".to_string()], None, CONTENT_QUALITY_THRESHOLD)
            .await
            .expect("fetch");
        assert!(text.contains("..."));
        assert!(text.len() < long.len());
    }

    #[test]
    fn test_build_context_includes_few_shot_block() {
        let few_shot = vec![ScoredExample {
            example: FewShotExample {
                question: "What is gravity?".to_string(),
                answer: "A force.".to_string(),
                reasoning: None,
            },
            score: 0.9,
        }];

        let prompt = build_context(
            "What is mass?",
            &results_with(&["Physics"]),
            "vector_search",
            "",
            &few_shot,
        );
        assert!(prompt.contains("Example 1:"));
        assert!(prompt.contains("What is gravity?"));
        assert!(prompt.contains("Query Type: vector_search"));
        assert!(prompt.contains("Physics"));
    }

    #[tokio::test]
    async fn test_synthesis_fallback_lists_sources_on_api_error() {
        let db = setup_db().await;
        let chat = StubChat::failing("quota exceeded");

        let answer = synthesize_answer(
            &db,
            &chat.as_dyn(),
            "model",
            "question",
            &results_with(&["Article A", "Article B"]),
            "vector_search",
            &[],
            CONTENT_QUALITY_THRESHOLD,
        )
        .await;

        assert!(answer.contains("Article A"));
        assert!(answer.contains("Article B"));
    }

    #[tokio::test]
    async fn test_synthesis_surfaces_retrieval_error() {
        let db = setup_db().await;
        let chat = StubChat::replying("should not be called");

        let results = KgResults {
            error: Some("everything broke".to_string()),
            ..KgResults::default()
        };
        let answer = synthesize_answer(
            &db,
            &chat.as_dyn(),
            "model",
            "q",
            &results,
            "vector_search",
            &[],
            CONTENT_QUALITY_THRESHOLD,
        )
        .await;

        assert!(answer.contains("Query execution failed"));
        assert_eq!(chat.calls(), 0);
    }
}
