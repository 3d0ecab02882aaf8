//! Vector-primary retrieval engine over a knowledge pack graph.

pub mod config;
pub mod few_shot;
pub mod graph;
pub mod graph_rag;
pub mod hybrid;
pub mod llm;
pub mod multi_query;
pub mod planner;
pub mod quality;
pub mod query_guard;
pub mod reranker;
pub mod semantic;
pub mod synthesis;

use std::path::Path;
use std::sync::{Arc, LazyLock};

use common::{
    error::AppError, storage::db::SurrealDbClient, utils::embedding::Embedder,
};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use config::RetrievalConfig;
pub use few_shot::FewShotManager;
pub use graph::{EntityInfo, RelationshipPath};
pub use graph_rag::GraphRagResponse;
pub use llm::{ChatModel, OpenAiChat};
pub use semantic::SearchHit;

use few_shot::ScoredExample;
use planner::PlanCache;
use reranker::Reranker;

/// Structured retrieval output fed into synthesis.
#[derive(Debug, Clone, Default)]
pub struct KgResults {
    pub sources: Vec<String>,
    pub entities: Vec<EntityHit>,
    pub facts: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityHit {
    pub name: String,
    pub entity_type: String,
}

/// Final answer plus provenance.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub entities: Vec<EntityHit>,
    pub facts: Vec<String>,
    /// The executed (or descriptive) retrieval query, for transparency.
    pub query: String,
    pub query_type: String,
}

/// Question prefixes stripped before direct title matching.
static QUESTION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(what is|what are|explain|describe|define|how does|how do|what does|who is|who was|when was|where is|why is|why does|tell me about)\s+",
    )
    .expect("valid question prefix pattern")
});

/// The retrieval engine: vector-primary with graph augmentation and
/// toggleable enhancements. One engine serves one pack, opened read-only;
/// the caller owns the lifetimes of the store, chat, and embedder.
pub struct QueryEngine {
    db: Arc<SurrealDbClient>,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    reranker: Reranker,
    few_shot: Option<FewShotManager>,
    plan_cache: Mutex<PlanCache>,
}

impl QueryEngine {
    pub async fn new(
        db: Arc<SurrealDbClient>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        let few_shot = if config.enable_fewshot {
            match &config.few_shot_path {
                Some(path) => match FewShotManager::load(Path::new(path), &embedder).await {
                    Ok(manager) => Some(manager),
                    Err(e) => {
                        warn!(error = %e, "Few-shot examples unavailable, disabling");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        Self {
            reranker: Reranker::new(db.clone()),
            db,
            chat,
            embedder,
            config,
            few_shot,
            plan_cache: Mutex::new(PlanCache::default()),
        }
    }

    /// Answer a question. Vector retrieval is primary; augmentation and
    /// enhancement steps degrade individually without failing the query.
    pub async fn query(
        &self,
        question: &str,
        max_results: usize,
        use_graph_rag: bool,
    ) -> Result<QueryResponse, AppError> {
        if !(1..=1000).contains(&max_results) {
            return Err(AppError::Validation(format!(
                "max_results must be between 1 and 1000, got {max_results}"
            )));
        }

        if use_graph_rag {
            let response = self.graph_query(question, 2, 5).await?;
            return Ok(QueryResponse {
                answer: response.answer,
                sources: response.sources,
                entities: Vec::new(),
                facts: Vec::new(),
                query: response.queries.join("; "),
                query_type: "graph_rag".to_string(),
            });
        }

        // Step 1: vector-primary retrieval
        let hits = if self.config.enable_multi_query {
            multi_query::multi_query_retrieve(
                &self.db,
                &self.embedder,
                &self.chat,
                &self.config.fast_model,
                question,
                max_results,
            )
            .await?
        } else {
            semantic::semantic_search(&self.db, &self.embedder, question, max_results).await?
        };

        let max_similarity = hits.first().map_or(0.0, |h| h.similarity);
        let confident = max_similarity >= self.config.vector_confidence_threshold;

        let (mut results, query_type, executed_query) = if confident
            || !self.config.enable_llm_planner
        {
            if confident {
                info!(max_similarity, "Vector primary retrieval succeeded");
            } else {
                debug!(
                    max_similarity,
                    "Low vector confidence, planner disabled, keeping vector results"
                );
            }
            let results = KgResults {
                sources: hits.iter().map(|h| h.title.clone()).collect(),
                ..KgResults::default()
            };
            (
                results,
                "vector_search".to_string(),
                "semantic section search over the vector index".to_string(),
            )
        } else {
            info!(
                max_similarity,
                threshold = self.config.vector_confidence_threshold,
                "Low vector confidence, falling back to generated query"
            );
            let plan = {
                let mut cache = self.plan_cache.lock().await;
                planner::plan_query(&self.chat, &self.config.fast_model, &mut cache, question)
                    .await
            };
            let results = planner::execute_plan(&self.db, &plan, question, max_results).await;
            (results, plan.query_type, plan.query)
        };

        // Step 2: direct title matches take precedence over everything
        match self.direct_title_lookup(question).await {
            Ok(direct) => {
                for title in direct.into_iter().rev() {
                    if !results.sources.contains(&title) {
                        results.sources.insert(0, title);
                    }
                }
            }
            Err(e) => debug!(error = %e, "Direct title lookup failed"),
        }

        // Step 3: hybrid augmentation; precise generated queries skip it
        let skip_hybrid = matches!(query_type.as_str(), "entity_search" | "entity_relationships");
        if !skip_hybrid {
            match hybrid::hybrid_retrieve(
                &self.db,
                &self.embedder,
                question,
                max_results,
                self.config.hybrid_weights,
            )
            .await
            {
                Ok(extra) => {
                    for source in extra.sources {
                        if !results.sources.contains(&source) {
                            results.sources.push(source);
                        }
                    }
                    for fact in extra.facts {
                        if !results.facts.contains(&fact) {
                            results.facts.push(fact);
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Hybrid augmentation failed"),
            }
        }

        // Step 4: adaptive enhancements
        if self.config.enable_reranker {
            if let Err(e) = self.apply_rank_fusion(&mut results).await {
                debug!(error = %e, "Rank fusion skipped");
            }
        }
        if self.config.enable_multidoc {
            if let Err(e) = self.expand_multidoc(&mut results).await {
                debug!(error = %e, "Multi-doc expansion skipped");
            }
        }
        let few_shot_examples = self.select_few_shot(question).await;

        // Step 5: synthesis
        let answer = synthesis::synthesize_answer(
            &self.db,
            &self.chat,
            &self.config.synthesis_model,
            question,
            &results,
            &query_type,
            &few_shot_examples,
            self.config.content_quality_threshold,
        )
        .await;

        Ok(QueryResponse {
            answer,
            sources: results.sources,
            entities: results.entities,
            facts: results.facts,
            query: executed_query,
            query_type,
        })
    }

    /// Strip question prefixes and match article titles, exact first,
    /// then contains ordered by title length.
    async fn direct_title_lookup(&self, question: &str) -> Result<Vec<String>, AppError> {
        use serde::Deserialize;

        #[derive(Deserialize)]
        struct Row {
            title: String,
        }

        let cleaned = QUESTION_PREFIX
            .replace(question, "")
            .trim()
            .trim_end_matches(['?', '.', ' '])
            .to_lowercase();
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let exact: Vec<Row> = self
            .db
            .query("SELECT title FROM article WHERE string::lowercase(title) = $q")
            .bind(("q", cleaned.clone()))
            .await?
            .take(0)?;
        if !exact.is_empty() {
            return Ok(exact.into_iter().map(|r| r.title).take(3).collect());
        }

        let partial: Vec<Row> = self
            .db
            .query(
                "SELECT title FROM article
                 WHERE string::contains(string::lowercase(title), $q)
                 ORDER BY string::len(title) ASC
                 LIMIT 3",
            )
            .bind(("q", cleaned))
            .await?
            .take(0)?;
        Ok(partial.into_iter().map(|r| r.title).collect())
    }

    /// Reciprocal rank fusion of the vector ranking with a centrality
    /// ranking, keeping the original when fusion would demote the top hit.
    async fn apply_rank_fusion(&self, results: &mut KgResults) -> Result<(), AppError> {
        if results.sources.is_empty() {
            return Ok(());
        }

        let top10: Vec<String> = results.sources.iter().take(10).cloned().collect();
        let centrality = self.reranker.calculate_centrality(&top10).await?;

        let mut by_centrality: Vec<String> = top10.clone();
        by_centrality.sort_by(|a, b| {
            let ca = centrality.get(a).copied().unwrap_or(0.0);
            let cb = centrality.get(b).copied().unwrap_or(0.0);
            cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
        });

        let fused = reranker::fuse_rankings(&results.sources, &by_centrality);
        if !fused.is_empty() {
            results.sources = fused;
        }
        Ok(())
    }

    /// Seed multi-document synthesis from the top hit's outgoing links,
    /// capped at 7 sources total.
    async fn expand_multidoc(&self, results: &mut KgResults) -> Result<(), AppError> {
        let Some(seed) = results.sources.first().cloned() else {
            return Ok(());
        };

        for neighbor in hybrid::outgoing_links(&self.db, &seed, 2).await? {
            if results.sources.len() >= 7 {
                break;
            }
            if !results.sources.contains(&neighbor) {
                results.sources.push(neighbor);
            }
        }
        Ok(())
    }

    async fn select_few_shot(&self, question: &str) -> Vec<ScoredExample> {
        let Some(manager) = &self.few_shot else {
            return Vec::new();
        };
        match manager.find_similar(&self.embedder, question, 2).await {
            Ok(examples) => examples,
            Err(e) => {
                debug!(error = %e, "Few-shot selection failed");
                Vec::new()
            }
        }
    }

    /// Semantic search over sections, aggregated to articles.
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        semantic::semantic_search(&self.db, &self.embedder, query, top_k).await
    }

    /// Blend vector similarity with graph centrality using the configured
    /// weights. Exposed for evaluation harnesses and A/B comparison.
    pub async fn rerank(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>, AppError> {
        self.reranker
            .rerank(
                hits,
                self.config.rerank_weights.vector,
                self.config.rerank_weights.graph,
            )
            .await
    }

    /// Multi-hop graph-aware retrieval and synthesis.
    pub async fn graph_query(
        &self,
        question: &str,
        max_hops: usize,
        max_context_articles: usize,
    ) -> Result<GraphRagResponse, AppError> {
        graph_rag::graph_query(
            &self.db,
            &self.chat,
            &self.config.fast_model,
            &self.config.synthesis_model,
            question,
            max_hops,
            max_context_articles,
        )
        .await
    }

    pub async fn find_entity(&self, name: &str) -> Result<Option<EntityInfo>, AppError> {
        graph::find_entity(&self.db, name).await
    }

    pub async fn find_relationship_path(
        &self,
        source: &str,
        target: &str,
        max_hops: usize,
    ) -> Result<Vec<RelationshipPath>, AppError> {
        graph::find_relationship_path(&self.db, source, target, max_hops).await
    }

    pub async fn get_entity_facts(&self, entity_or_article: &str) -> Result<Vec<String>, AppError> {
        graph::get_entity_facts(&self.db, entity_or_article).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{
        error::AppError,
        storage::{
            db::SurrealDbClient,
            types::{article::Article, section::Section},
        },
        utils::embedding::Embedder,
    };
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::llm::ChatModel;

    pub async fn setup_db() -> Arc<SurrealDbClient> {
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.redefine_vector_indexes(3)
            .await
            .expect("Failed to define vector indexes");
        db
    }

    /// Store a loaded article with a single lead section at the given
    /// embedding.
    pub async fn index_article(db: &Arc<SurrealDbClient>, title: &str, embedding: Vec<f32>) {
        let content = format!("{title} lead section content with enough words to not be a stub, repeated for padding and length and more padding so quality filters pass easily every time.");
        index_article_with_content(db, title, &content, embedding).await;
    }

    pub async fn index_article_with_content(
        db: &Arc<SurrealDbClient>,
        title: &str,
        content: &str,
        embedding: Vec<f32>,
    ) {
        Article::upsert_loaded(db, title, "General", 100, 0)
            .await
            .expect("article");
        let section = Section::new(
            title,
            0,
            title.to_string(),
            content.to_string(),
            embedding,
            2,
        );
        Section::create_with_edge(db, title, 0, section)
            .await
            .expect("section");
    }

    enum EmbedderMode {
        Shared(Vec<f32>),
        Sequence(Mutex<Vec<Vec<f32>>>),
    }

    /// Test embedder that counts API invocations and serves either one
    /// fixed vector or a per-embedding sequence.
    pub struct CountingEmbedder {
        mode: EmbedderMode,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        pub fn shared(embedding: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                mode: EmbedderMode::Shared(embedding),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn sequence(embeddings: Vec<Vec<f32>>) -> Arc<Self> {
            Arc::new(Self {
                mode: EmbedderMode::Sequence(Mutex::new(embeddings)),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Embedder> {
            Arc::clone(self) as Arc<dyn Embedder>
        }

        async fn next(&self) -> Vec<f32> {
            match &self.mode {
                EmbedderMode::Shared(embedding) => embedding.clone(),
                EmbedderMode::Sequence(remaining) => {
                    let mut remaining = remaining.lock().await;
                    if remaining.is_empty() {
                        vec![0.0, 0.0, 1.0]
                    } else {
                        remaining.remove(0)
                    }
                }
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.next().await)
        }

        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Vec::with_capacity(inputs.len());
            for _ in inputs {
                out.push(self.next().await);
            }
            Ok(out)
        }

        fn dimensions(&self) -> u32 {
            3
        }
    }

    enum ChatMode {
        Reply(String),
        Fail(String),
        Hang(Duration),
        /// First call replies, subsequent calls fail.
        ReplyOnceThenFail(String),
    }

    /// Test chat model with canned behavior and a call counter.
    pub struct StubChat {
        mode: ChatMode,
        calls: AtomicUsize,
    }

    impl StubChat {
        pub fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                mode: ChatMode::Reply(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                mode: ChatMode::Fail(message.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn hanging(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                mode: ChatMode::Hang(delay),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn replying_then_failing(text: &str) -> Arc<Self> {
            Arc::new(Self {
                mode: ChatMode::ReplyOnceThenFail(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn ChatModel> {
            Arc::clone(self) as Arc<dyn ChatModel>
        }
    }

    #[async_trait]
    impl ChatModel for StubChat {
        async fn complete(
            &self,
            _model: &str,
            _system: &str,
            _prompt: &str,
        ) -> Result<String, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.mode {
                ChatMode::Reply(text) => Ok(text.clone()),
                ChatMode::Fail(message) => Err(AppError::InternalError(message.clone())),
                ChatMode::Hang(delay) => {
                    tokio::time::sleep(*delay).await;
                    Err(AppError::InternalError("hung call completed".to_string()))
                }
                ChatMode::ReplyOnceThenFail(text) => {
                    if call == 0 {
                        Ok(text.clone())
                    } else {
                        Err(AppError::InternalError("subsequent call fails".to_string()))
                    }
                }
            }
        }
    }
}
