//! Legacy LLM query planner: generates a read query when vector retrieval
//! has low confidence. Disabled by default; every generated query passes
//! the read-only guard before execution.

use std::collections::HashMap;
use std::sync::Arc;

use common::{error::AppError, storage::db::SurrealDbClient};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::hybrid::titles_containing;
use crate::llm::{strip_code_fences, ChatModel};
use crate::query_guard::validate_query;
use crate::{EntityHit, KgResults};

const PLAN_CACHE_CAPACITY: usize = 128;

const PLANNER_SYSTEM: &str = "You generate read-only database queries for a knowledge graph. \
Respond with a single JSON object and nothing else.";

/// A generated retrieval plan.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query_type: String,
    pub query: String,
}

impl QueryPlan {
    /// The safety-net plan when generation fails: a title-contains scan.
    fn fallback(reason: &str) -> Self {
        debug!(reason, "Using fallback query plan");
        Self {
            query_type: "title_search".to_string(),
            query: "SELECT title FROM article \
                    WHERE string::contains(string::lowercase(title), string::lowercase($q)) \
                    LIMIT 10"
                .to_string(),
        }
    }
}

/// LRU cache over normalized question text.
pub struct PlanCache {
    entries: HashMap<String, QueryPlan>,
    order: Vec<String>,
    capacity: usize,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(PLAN_CACHE_CAPACITY)
    }
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            capacity,
        }
    }

    fn normalize(question: &str) -> String {
        question.trim().to_lowercase()
    }

    pub fn get(&mut self, question: &str) -> Option<QueryPlan> {
        let key = Self::normalize(question);
        let plan = self.entries.get(&key).cloned()?;
        // Refresh LRU position
        self.order.retain(|k| k != &key);
        self.order.push(key);
        Some(plan)
    }

    pub fn insert(&mut self, question: &str, plan: QueryPlan) {
        let key = Self::normalize(question);
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= self.capacity {
            if !self.order.is_empty() {
                let oldest = self.order.remove(0);
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key.clone(), plan);
        self.order.push(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Generate (or recall) a query plan for a question. Generation failures
/// degrade to the fallback plan; the result is always cached.
pub async fn plan_query(
    chat: &Arc<dyn ChatModel>,
    model: &str,
    cache: &mut PlanCache,
    question: &str,
) -> QueryPlan {
    if let Some(plan) = cache.get(question) {
        info!("Query plan cache hit");
        return plan;
    }

    let plan = generate_plan(chat, model, question).await;
    cache.insert(question, plan.clone());
    plan
}

async fn generate_plan(chat: &Arc<dyn ChatModel>, model: &str, question: &str) -> QueryPlan {
    let prompt = format!(
        r#"Generate a read-only query for a knowledge graph with these tables:
- article (title, category, word_count)
- entity (name, entity_type, description)
- fact (content)
- section (title, content, word_count)
- graph edges: has_entity, has_fact, entity_relation (relation, context), links_to (link_type), has_section (section_index)

Rules:
- The query MUST start with SELECT. No other statement kinds exist for you.
- Use $q as the bound parameter holding the user's search text.
- Use string::contains(string::lowercase(field), string::lowercase($q)) for case-insensitive matching.
- Graph steps look like: SELECT out.content AS fact FROM has_fact WHERE in.title = $q
- Always include a LIMIT.

Query types and examples:
1. entity_search: SELECT name, entity_type FROM entity WHERE string::contains(string::lowercase(name), string::lowercase($q)) LIMIT 10
2. fact_retrieval: SELECT out.content AS content, in.title AS title FROM has_fact WHERE string::contains(string::lowercase(in.title), string::lowercase($q)) LIMIT 10
3. entity_relationships: SELECT in.name AS source, relation, out.name AS target FROM entity_relation WHERE string::contains(string::lowercase(in.name), string::lowercase($q)) LIMIT 10
4. title_search: SELECT title, category FROM article WHERE string::contains(string::lowercase(title), string::lowercase($q)) LIMIT 10

Question: {question}

Return ONLY JSON in this exact format:
{{"type": "entity_search", "query": "SELECT ..."}}"#
    );

    #[derive(Deserialize)]
    struct RawPlan {
        #[serde(rename = "type")]
        query_type: String,
        query: String,
    }

    let response = match chat.complete(model, PLANNER_SYSTEM, &prompt).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Query planning failed");
            return QueryPlan::fallback("api error");
        }
    };

    match serde_json::from_str::<RawPlan>(strip_code_fences(&response)) {
        Ok(raw) => QueryPlan {
            query_type: raw.query_type,
            query: raw.query,
        },
        Err(e) => {
            warn!(error = %e, "Query plan JSON parse failed");
            QueryPlan::fallback("parse error")
        }
    }
}

/// Validate and execute a generated plan, structuring whatever rows come
/// back. A failing plan falls back to a title-contains search so the
/// engine can still answer.
pub async fn execute_plan(
    db: &Arc<SurrealDbClient>,
    plan: &QueryPlan,
    question: &str,
    limit: usize,
) -> KgResults {
    let execution: Result<Vec<serde_json::Value>, AppError> = async {
        validate_query(&plan.query)?;
        let rows: Vec<serde_json::Value> = db
            .query(&plan.query)
            .bind(("q", question.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }
    .await;

    match execution {
        Ok(rows) => structure_rows(&rows, limit),
        Err(e) => {
            warn!(error = %e, "Generated query failed, trying title fallback");
            match titles_containing(db, question, limit).await {
                Ok(sources) if !sources.is_empty() => KgResults {
                    sources,
                    ..KgResults::default()
                },
                Ok(_) => KgResults {
                    error: Some("Primary query failed and fallback found no results".to_string()),
                    ..KgResults::default()
                },
                Err(fallback_err) => KgResults {
                    error: Some(format!("Both primary and fallback queries failed: {fallback_err}")),
                    ..KgResults::default()
                },
            }
        }
    }
}

/// Pull sources, entities, and facts out of arbitrarily-shaped rows by
/// column naming conventions.
fn structure_rows(rows: &[serde_json::Value], limit: usize) -> KgResults {
    let mut results = KgResults::default();

    for row in rows.iter().take(limit) {
        let Some(object) = row.as_object() else {
            continue;
        };

        for (key, value) in object {
            let key_lower = key.to_lowercase();
            if let Some(text) = value.as_str() {
                if key_lower.contains("title") || key_lower == "source" || key_lower == "target" {
                    if !results.sources.contains(&text.to_string()) {
                        results.sources.push(text.to_string());
                    }
                } else if (key_lower.contains("name") || key_lower.contains("entity"))
                    && !key_lower.contains("type")
                {
                    let entity_type = object
                        .iter()
                        .find(|(k, _)| k.to_lowercase().contains("type"))
                        .and_then(|(_, v)| v.as_str())
                        .unwrap_or("unknown");
                    results.entities.push(EntityHit {
                        name: text.to_string(),
                        entity_type: entity_type.to_string(),
                    });
                } else if matches!(key_lower.as_str(), "content" | "fact" | "relation") {
                    results.facts.push(text.to_string());
                }
            }
        }
    }

    results.sources.truncate(limit);
    results.facts.truncate(limit);
    results
}
