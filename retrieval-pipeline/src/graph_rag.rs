//! Graph-aware RAG: multi-hop traversal from seed articles before
//! synthesis.

use std::collections::HashSet;
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::section::Section},
};
use serde::Deserialize;
use surrealdb::RecordId;
use tracing::{info, warn};

use crate::llm::{strip_code_fences, ChatModel};
use crate::quality::STOP_WORDS;

/// Total articles consulted, across all seeds, is capped to bound
/// synthesis cost.
const MAX_TOTAL_ARTICLES: usize = 15;

const SEED_SYSTEM: &str = "You identify encyclopedia article titles relevant to a question. \
Respond with a JSON array of strings and nothing else.";

#[derive(Debug, Clone)]
pub struct GraphRagResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub hops_traversed: usize,
    pub articles_consulted: usize,
    pub queries: Vec<String>,
}

/// Answer a question by walking `links_to` edges outward from seed
/// articles and synthesizing over the gathered lead sections.
pub async fn graph_query(
    db: &Arc<SurrealDbClient>,
    chat: &Arc<dyn ChatModel>,
    fast_model: &str,
    synthesis_model: &str,
    question: &str,
    max_hops: usize,
    max_context_articles: usize,
) -> Result<GraphRagResponse, AppError> {
    if !(1..=10).contains(&max_hops) {
        return Err(AppError::Validation(format!(
            "max_hops must be between 1 and 10, got {max_hops}"
        )));
    }
    if !(1..=50).contains(&max_context_articles) {
        return Err(AppError::Validation(format!(
            "max_context_articles must be between 1 and 50, got {max_context_articles}"
        )));
    }

    let seeds = identify_seed_articles(chat, fast_model, question).await;
    info!(?seeds, "Graph RAG seeds identified");

    let mut queries = vec![format!(
        "SELECT out.title FROM links_to WHERE in = $seed AND out.word_count > 0 (BFS to depth {max_hops})"
    )];

    // Bounded BFS per seed with a shared visited set; cycles in links_to
    // are expected and harmless
    let mut related: Vec<String> = Vec::new();
    for seed in &seeds {
        match traverse(db, seed, max_hops, max_context_articles).await {
            Ok(found) => related.extend(found),
            Err(e) => warn!(seed = %seed, error = %e, "Traversal failed"),
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut consulted: Vec<String> = Vec::new();
    for title in seeds.iter().chain(related.iter()) {
        if seen.insert(title.clone()) {
            consulted.push(title.clone());
        }
        if consulted.len() >= MAX_TOTAL_ARTICLES {
            break;
        }
    }

    queries.push("SELECT content FROM section WHERE id = article lead".to_string());
    let contexts = Section::lead_contents(db, &consulted).await?;

    let combined = if contexts.is_empty() {
        "(no context found)".to_string()
    } else {
        contexts
            .iter()
            .map(|(title, content)| format!("## {title}\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let answer = synthesize(chat, synthesis_model, question, &combined, &consulted).await;

    Ok(GraphRagResponse {
        answer,
        sources: consulted.clone(),
        hops_traversed: max_hops,
        articles_consulted: contexts.len(),
        queries,
    })
}

/// BFS over outgoing `links_to` edges from one seed, skipping contentless
/// nodes, bounded by depth and result count.
async fn traverse(
    db: &SurrealDbClient,
    seed: &str,
    max_hops: usize,
    limit: usize,
) -> Result<Vec<String>, AppError> {
    let mut visited: HashSet<String> = HashSet::from([seed.to_string()]);
    let mut frontier = vec![seed.to_string()];
    let mut found = Vec::new();

    for _ in 0..max_hops {
        if frontier.is_empty() || found.len() >= limit {
            break;
        }
        let mut next = Vec::new();
        for title in frontier.drain(..) {
            for (neighbor, word_count) in linked_articles(db, &title).await? {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                next.push(neighbor.clone());
                if word_count > 0 && found.len() < limit {
                    found.push(neighbor);
                }
            }
        }
        frontier = next;
    }

    Ok(found)
}

async fn linked_articles(
    db: &SurrealDbClient,
    title: &str,
) -> Result<Vec<(String, i64)>, AppError> {
    #[derive(Deserialize)]
    struct Row {
        title: Option<String>,
        word_count: Option<i64>,
    }

    let rows: Vec<Row> = db
        .query(
            "SELECT out.title AS title, out.word_count AS word_count
             FROM links_to WHERE in = $source",
        )
        .bind(("source", RecordId::from_table_key("article", title)))
        .await?
        .take(0)?;

    Ok(rows
        .into_iter()
        .filter_map(|r| r.title.map(|t| (t, r.word_count.unwrap_or(0))))
        .collect())
}

/// Seed titles from the LLM, with a keyword heuristic as the fallback.
async fn identify_seed_articles(
    chat: &Arc<dyn ChatModel>,
    fast_model: &str,
    question: &str,
) -> Vec<String> {
    let prompt = format!(
        "Given the question below, return a JSON array of 1-3 encyclopedia article titles \
         that would serve as good starting points for answering it.\n\
         Return ONLY a JSON array of strings.\n\
         Example: [\"Machine Learning\", \"Neural Network\"]\n\n\
         Question: {question}"
    );

    match chat.complete(fast_model, SEED_SYSTEM, &prompt).await {
        Ok(response) => {
            match serde_json::from_str::<Vec<String>>(strip_code_fences(&response)) {
                Ok(titles) if !titles.is_empty() => titles.into_iter().take(3).collect(),
                _ => {
                    warn!("Seed title JSON parse failed, using keyword fallback");
                    fallback_seed_extraction(question)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Seed identification failed, using keyword fallback");
            fallback_seed_extraction(question)
        }
    }
}

/// Stop-word-filtered keywords from the question, preserving the original
/// casing so case-insensitive matching happens in the store.
pub fn fallback_seed_extraction(question: &str) -> Vec<String> {
    let candidates: Vec<String> = question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w.to_lowercase().as_str()))
        .take(3)
        .collect();

    if candidates.is_empty() {
        vec!["Artificial intelligence".to_string()]
    } else {
        candidates
    }
}

async fn synthesize(
    chat: &Arc<dyn ChatModel>,
    model: &str,
    question: &str,
    context: &str,
    sources: &[String],
) -> String {
    let prompt = format!(
        "Using the following context gathered by traversing a knowledge graph, answer the \
         question below. Cite specific article titles where possible.\n\n\
         Question: {question}\n\n\
         Context from {} articles:\n{context}\n\n\
         Provide a clear, factual answer. If the context is insufficient, say so.",
        sources.len()
    );

    match chat
        .complete(model, "You answer questions from knowledge graph context.", &prompt)
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Synthesis failed, returning source list");
            if sources.is_empty() {
                "No results found.".to_string()
            } else {
                format!(
                    "Found {} related articles: {}",
                    sources.len(),
                    sources
                        .iter()
                        .take(5)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
        }
    }
}
