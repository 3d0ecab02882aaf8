//! Single-article ingestion pipeline: fetch, parse, embed, extract, load.

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            article::Article, category::Category, chunk::Chunk, entity::Entity, fact::Fact,
            section::Section,
        },
    },
    utils::{embedding::Embedder, sanitize::sanitize_error},
};
use tracing::{debug, info, warn};

use crate::{
    chunker::{self, PendingChunk},
    extractor::{detect_domain, ExtractionResult, LlmExtractor},
    sources::{wikitext, ContentSource, ParsedSection, SourceArticle, SourceError, SourceType},
};

/// Result of processing one article. Failures are data, not errors: the
/// driver turns them into retry bookkeeping.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub links: Vec<String>,
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn ok(links: Vec<String>) -> Self {
        Self {
            success: true,
            links,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            links: Vec::new(),
            error: Some(error),
        }
    }
}

/// Everything needed to write one article to the graph, produced by the
/// network/LLM-bound prepare stage. Splitting prepare from write lets the
/// parallel driver fan out the slow half while keeping a single writer.
pub struct PreparedArticle {
    pub article: SourceArticle,
    pub sections: Vec<ParsedSection>,
    pub section_embeddings: Vec<Vec<f32>>,
    pub chunks: Vec<PendingChunk>,
    pub chunk_embeddings: Vec<Vec<f32>>,
    pub extraction: ExtractionResult,
    pub category: String,
    pub depth: i64,
}

/// Outcome of the prepare stage.
pub enum Prepared {
    Ready(Box<PreparedArticle>),
    /// Successfully handled but nothing to index (empty stub, or a redirect
    /// whose target is also missing).
    Stub,
}

pub struct ArticleProcessor {
    db: Arc<SurrealDbClient>,
    source: Arc<dyn ContentSource>,
    embedder: Arc<dyn Embedder>,
    extractor: Option<Arc<LlmExtractor>>,
    chunking_enabled: bool,
}

impl ArticleProcessor {
    pub fn new(
        db: Arc<SurrealDbClient>,
        source: Arc<dyn ContentSource>,
        embedder: Arc<dyn Embedder>,
        extractor: Option<Arc<LlmExtractor>>,
    ) -> Self {
        Self {
            db,
            source,
            embedder,
            extractor,
            chunking_enabled: true,
        }
    }

    pub fn with_chunking(mut self, enabled: bool) -> Self {
        self.chunking_enabled = enabled;
        self
    }

    /// Process a single article end to end. Never returns an error;
    /// failures are captured in the outcome with a sanitized message.
    pub async fn process_article(
        &self,
        title_or_url: &str,
        category: &str,
        expansion_depth: i64,
    ) -> ProcessOutcome {
        info!(title = title_or_url, depth = expansion_depth, "Processing article");

        let prepared = match self.prepare(title_or_url, category, expansion_depth).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let msg = sanitize_error(&e.to_string());
                warn!(title = title_or_url, error = %msg, "Article preparation failed");
                return ProcessOutcome::failed(msg);
            }
        };

        match prepared {
            Prepared::Stub => {
                info!(title = title_or_url, "Stub article, nothing to index");
                ProcessOutcome::ok(Vec::new())
            }
            Prepared::Ready(prepared) => {
                let links = prepared.article.links.clone();
                match self.write(*prepared).await {
                    Ok(()) => ProcessOutcome::ok(links),
                    Err(e) => {
                        let msg = sanitize_error(&e.to_string());
                        warn!(title = title_or_url, error = %msg, "Article write failed");
                        ProcessOutcome::failed(msg)
                    }
                }
            }
        }
    }

    /// The network/LLM-bound half: fetch, follow redirects, parse, embed,
    /// extract. No graph writes happen here.
    pub async fn prepare(
        &self,
        title_or_url: &str,
        category: &str,
        expansion_depth: i64,
    ) -> Result<Prepared, AppError> {
        let mut article = match self.source.fetch_article(title_or_url).await {
            Ok(article) => article,
            Err(SourceError::NotFound(msg)) => return Err(AppError::NotFound(msg)),
            Err(other) => return Err(other.into()),
        };
        debug!(
            title = %article.title,
            chars = article.content.len(),
            "Fetched from {}",
            article.source_type.as_str()
        );

        // Wikipedia redirect stubs point at the real article
        if article.source_type == SourceType::Wikipedia {
            if let Some(target) = wikitext::redirect_target(&article.content) {
                info!(from = title_or_url, to = %target, "Following redirect");
                article = match self.source.fetch_article(&target).await {
                    Ok(article) => article,
                    Err(SourceError::NotFound(_)) => {
                        // A dangling redirect is not an error, just nothing
                        info!(title = title_or_url, "Unfollowable redirect, skipping");
                        return Ok(Prepared::Stub);
                    }
                    Err(other) => {
                        return Err(AppError::Processing(format!(
                            "Redirect target fetch failed: {other}"
                        )))
                    }
                };
            }
        }

        let sections = self.source.parse_sections(&article.content);
        if sections.is_empty() {
            return Ok(Prepared::Stub);
        }
        debug!(title = %article.title, count = sections.len(), "Parsed sections");

        let section_texts: Vec<String> = sections.iter().map(|s| s.content.clone()).collect();
        let section_embeddings = self.embedder.embed_batch(&section_texts).await?;

        let extraction = match &self.extractor {
            Some(extractor) => {
                let domain = detect_domain(&article.categories);
                extractor
                    .extract_from_article(&article.title, &sections, domain)
                    .await
            }
            None => ExtractionResult::default(),
        };

        let (chunks, chunk_embeddings) = if self.chunking_enabled {
            let chunks = chunker::chunk_sections(&sections);
            let chunk_texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            match self.embedder.embed_batch(&chunk_texts).await {
                Ok(embeddings) => (chunks, embeddings),
                Err(e) => {
                    // Chunks are an optional refinement over sections
                    debug!(title = %article.title, error = %e, "Chunk embedding skipped");
                    (Vec::new(), Vec::new())
                }
            }
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Prepared::Ready(Box::new(PreparedArticle {
            article,
            sections,
            section_embeddings,
            chunks,
            chunk_embeddings,
            extraction,
            category: category.to_string(),
            depth: expansion_depth,
        })))
    }

    /// The write half: a sequence of idempotent delete-then-insert
    /// statements. No multi-statement transaction is used; re-running after
    /// a partial failure converges to the same state.
    pub async fn write(&self, prepared: PreparedArticle) -> Result<(), AppError> {
        let PreparedArticle {
            article,
            sections,
            section_embeddings,
            chunks,
            chunk_embeddings,
            extraction,
            category,
            depth,
        } = prepared;

        let word_count = article.content.split_whitespace().count() as i64;
        let title = article.title.as_str();

        Article::upsert_loaded(&self.db, title, &category, word_count, depth).await?;

        // Sections are wholly owned: drop and re-create
        Section::delete_for_article(&self.db, title).await?;
        for (i, (section, embedding)) in sections.iter().zip(section_embeddings).enumerate() {
            let node = Section::new(
                title,
                i,
                section.title.clone(),
                section.content.clone(),
                embedding,
                section.level,
            );
            Section::create_with_edge(&self.db, title, i, node).await?;
        }

        if !chunks.is_empty() {
            if let Err(e) = self.write_chunks(title, &chunks, chunk_embeddings).await {
                debug!(title, error = %e, "Chunk insertion skipped");
            }
        }

        Category::unlink_article(&self.db, title).await?;
        for cat in article.categories.iter().take(3) {
            Category::upsert_and_link(&self.db, title, cat).await?;
        }

        if !extraction.is_empty() {
            if let Err(e) = self.write_extraction(title, &extraction).await {
                warn!(
                    title,
                    error = %sanitize_error(&e.to_string()),
                    "Failed to insert extracted knowledge"
                );
            }
        }

        info!(title, sections = sections.len(), "Article loaded");
        Ok(())
    }

    async fn write_chunks(
        &self,
        title: &str,
        chunks: &[PendingChunk],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), AppError> {
        Chunk::delete_for_article(&self.db, title).await?;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let node = Chunk::new(
                title,
                chunk.section_index,
                chunk.chunk_index,
                chunk.content.clone(),
                embedding,
            );
            Chunk::create_with_edge(&self.db, node).await?;
        }
        debug!(title, count = chunks.len(), "Chunks created");
        Ok(())
    }

    async fn write_extraction(
        &self,
        title: &str,
        extraction: &ExtractionResult,
    ) -> Result<(), AppError> {
        Entity::unlink_article(&self.db, title).await?;
        Fact::unlink_article(&self.db, title).await?;

        // Entity ids are article-scoped; the map carries name -> id for
        // wiring relationships below
        let mut entity_ids = std::collections::HashMap::new();
        for extracted in &extraction.entities {
            let entity = Entity::new(
                title,
                extracted.name.clone(),
                extracted.entity_type,
                extracted.description.clone(),
            );
            entity_ids.insert(extracted.name.clone(), entity.id.clone());
            Entity::upsert_and_link(&self.db, title, entity).await?;
        }

        for (i, fact_content) in extraction.key_facts.iter().enumerate() {
            Fact::upsert_and_link(&self.db, title, Fact::new(title, i, fact_content.clone()))
                .await?;
        }

        // Relations only between entities extracted from this article
        let mut relations_written = 0usize;
        for rel in &extraction.relationships {
            if let (Some(source_id), Some(target_id)) =
                (entity_ids.get(&rel.source), entity_ids.get(&rel.target))
            {
                Entity::relate(&self.db, source_id, target_id, &rel.relation, &rel.context)
                    .await?;
                relations_written += 1;
            }
        }

        info!(
            title,
            entities = extraction.entities.len(),
            facts = extraction.key_facts.len(),
            relations = relations_written,
            "Extraction stored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::types::article::ExpansionState;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
            let len = input.len() as f32;
            Ok(common::utils::embedding::normalize(vec![
                1.0,
                (len % 7.0) / 7.0,
                (len % 13.0) / 13.0,
            ]))
        }

        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            let mut out = Vec::with_capacity(inputs.len());
            for input in inputs {
                out.push(self.embed(input).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> u32 {
            3
        }
    }

    struct StaticSource {
        articles: HashMap<String, SourceArticle>,
    }

    impl StaticSource {
        fn new(articles: Vec<SourceArticle>) -> Self {
            Self {
                articles: articles
                    .into_iter()
                    .map(|a| (a.title.clone(), a))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn fetch_article(&self, title_or_url: &str) -> Result<SourceArticle, SourceError> {
            self.articles
                .get(title_or_url)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(format!("Article not found: {title_or_url}")))
        }

        fn parse_sections(&self, content: &str) -> Vec<ParsedSection> {
            wikitext::parse_sections(content)
        }

        fn get_links(&self, content: &str) -> Vec<String> {
            wikitext::extract_wikilinks(content)
        }

        fn source_type(&self) -> SourceType {
            SourceType::Wikipedia
        }
    }

    fn wiki_article(title: &str, content: &str, links: &[&str], categories: &[&str]) -> SourceArticle {
        SourceArticle {
            title: title.to_string(),
            content: content.to_string(),
            links: links.iter().map(|s| (*s).to_string()).collect(),
            categories: categories.iter().map(|s| (*s).to_string()).collect(),
            source_url: format!("https://en.wikipedia.org/wiki/{title}"),
            source_type: SourceType::Wikipedia,
        }
    }

    fn two_section_content() -> String {
        let body = "This body sentence is repeated to clear the length floor for sections. ";
        format!(
            "== Overview ==\n{}\n== Details ==\n{}",
            body.repeat(3),
            body.repeat(3)
        )
    }

    async fn setup() -> (Arc<SurrealDbClient>, Arc<StaticSource>) {
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.redefine_vector_indexes(3)
            .await
            .expect("Failed to define indexes");

        let source = Arc::new(StaticSource::new(vec![
            wiki_article(
                "Python",
                &two_section_content(),
                &["Machine Learning", "Guido van Rossum"],
                &["Programming languages", "Computer science"],
            ),
            wiki_article("Stub", "tiny", &["Somewhere"], &[]),
            wiki_article("Redirector", "#REDIRECT [[Python]]", &[], &[]),
            wiki_article("Dangling", "#REDIRECT [[Nowhere]]", &[], &[]),
        ]));

        (db, source)
    }

    fn processor(db: Arc<SurrealDbClient>, source: Arc<StaticSource>) -> ArticleProcessor {
        ArticleProcessor::new(db, source, Arc::new(StubEmbedder), None)
    }

    #[tokio::test]
    async fn test_process_inserts_sections_with_contiguous_indexes() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        let outcome = processor.process_article("Python", "Tech", 0).await;
        assert!(outcome.success, "error: {:?}", outcome.error);
        assert_eq!(outcome.links.len(), 2);

        assert_eq!(Section::edge_count(&db, "Python").await.expect("count"), 2);
        let sections = Section::for_article(&db, "Python").await.expect("sections");
        assert_eq!(sections[0].id, "Python#0");
        assert_eq!(sections[1].id, "Python#1");

        let article = Article::get_by_title(&db, "Python")
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(article.expansion_state, ExpansionState::Loaded);
        assert!(article.word_count > 0);
        assert!(article.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_process_twice_is_idempotent() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        for _ in 0..2 {
            let outcome = processor.process_article("Python", "Tech", 0).await;
            assert!(outcome.success);
        }

        assert_eq!(Section::edge_count(&db, "Python").await.expect("count"), 2);
        assert_eq!(
            Category::edge_count(&db, "Python").await.expect("count"),
            2
        );
        // Category counter incremented twice, once per reprocess
        let category = db
            .get_item::<Category>("Programming languages")
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(category.article_count, 2);
    }

    #[tokio::test]
    async fn test_missing_article_fails_without_retrying() {
        let (db, source) = setup().await;
        let processor = processor(db, source);

        let outcome = processor.process_article("Nope", "General", 0).await;
        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("not found"));
    }

    #[tokio::test]
    async fn test_stub_article_succeeds_with_no_links() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        let outcome = processor.process_article("Stub", "General", 1).await;
        assert!(outcome.success);
        assert!(outcome.links.is_empty());
        // Nothing indexed for a stub
        assert!(Article::get_by_title(&db, "Stub")
            .await
            .expect("fetch")
            .is_none());
    }

    #[tokio::test]
    async fn test_redirect_is_followed() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        let outcome = processor.process_article("Redirector", "Tech", 0).await;
        assert!(outcome.success);
        assert!(!outcome.links.is_empty());
        assert!(Article::get_by_title(&db, "Python")
            .await
            .expect("fetch")
            .is_some());
    }

    #[tokio::test]
    async fn test_dangling_redirect_is_success_with_no_links() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        let outcome = processor.process_article("Dangling", "Tech", 0).await;
        assert!(outcome.success);
        assert!(outcome.links.is_empty());
    }

    #[tokio::test]
    async fn test_chunks_created_for_long_sections() {
        let (db, source) = setup().await;
        let processor = processor(db.clone(), source);

        processor.process_article("Python", "Tech", 0).await;
        // Sections are short, so each yields exactly one chunk
        assert_eq!(Chunk::count_for_article(&db, "Python").await.expect("count"), 2);
    }
}
