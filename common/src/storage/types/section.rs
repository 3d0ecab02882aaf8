use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

stored_object!(Section, "section", {
    title: String,
    content: String,
    embedding: Vec<f32>,
    level: i64,
    word_count: i64
});

/// A section hit from the vector index, before per-article aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionVectorHit {
    pub section_id: String,
    pub distance: f32,
}

impl Section {
    /// Section ids embed their article and position: `"{title}#{index}"`.
    pub fn section_id(article_title: &str, index: usize) -> String {
        format!("{article_title}#{index}")
    }

    pub fn new(
        article_title: &str,
        index: usize,
        title: String,
        content: String,
        embedding: Vec<f32>,
        level: i64,
    ) -> Self {
        let now = Utc::now();
        let word_count = content.split_whitespace().count() as i64;
        Self {
            id: Self::section_id(article_title, index),
            created_at: now,
            updated_at: now,
            title,
            content,
            embedding,
            level,
            word_count,
        }
    }

    /// Article an id belongs to (the part before the `#` separator).
    pub fn article_of(section_id: &str) -> &str {
        section_id.split('#').next().unwrap_or(section_id)
    }

    /// Deletes an article's sections along with their `has_section` edges.
    /// Run before re-inserting to keep retries idempotent.
    pub async fn delete_for_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<(), AppError> {
        db.query(
            "LET $secs = (SELECT VALUE out FROM has_section WHERE in = $article);
             DELETE has_section WHERE in = $article;
             DELETE $secs;",
        )
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .await?
        .check()?;
        Ok(())
    }

    /// Creates the section node and its ordered `has_section` edge in one
    /// combined write.
    pub async fn create_with_edge(
        db: &SurrealDbClient,
        article_title: &str,
        index: usize,
        section: Section,
    ) -> Result<(), AppError> {
        db.query(
            "CREATE type::thing('section', $section_id) CONTENT $section;
             RELATE $article->has_section->(type::thing('section', $section_id))
                 SET section_index = $index;",
        )
        .bind(("section_id", section.id.clone()))
        .bind(("section", section))
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .bind(("index", index as i64))
        .await?
        .check()?;
        Ok(())
    }

    /// KNN over the section vector index, returning raw per-section
    /// distances. Callers aggregate to articles.
    pub async fn vector_search(
        db: &SurrealDbClient,
        query_embedding: Vec<f32>,
        take: usize,
    ) -> Result<Vec<SectionVectorHit>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            section_id: String,
            score: f32,
        }

        let sql = format!(
            "SELECT record::id(id) AS section_id,
                    vector::similarity::cosine(embedding, $embedding) AS score
             FROM section
             WHERE embedding <|{take},100|> $embedding
             ORDER BY score DESC
             LIMIT {take}"
        );

        let rows: Vec<Row> = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .await?
            .take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| SectionVectorHit {
                section_id: r.section_id,
                distance: 1.0 - r.score,
            })
            .collect())
    }

    /// Embedding of an article's lead section, if the article is indexed.
    pub async fn lead_embedding(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<Option<Vec<f32>>, AppError> {
        let section = db
            .get_item::<Section>(&Self::section_id(article_title, 0))
            .await?;
        Ok(section.map(|s| s.embedding))
    }

    /// Lead-section content for a set of articles, batched into one query.
    pub async fn lead_contents(
        db: &SurrealDbClient,
        article_titles: &[String],
    ) -> Result<Vec<(String, String)>, AppError> {
        if article_titles.is_empty() {
            return Ok(Vec::new());
        }

        #[derive(Deserialize)]
        struct Row {
            section_id: String,
            content: String,
        }

        let ids: Vec<RecordId> = article_titles
            .iter()
            .map(|t| RecordId::from_table_key("section", Self::section_id(t, 0)))
            .collect();

        let rows: Vec<Row> = db
            .query("SELECT record::id(id) AS section_id, content FROM section WHERE id IN $ids")
            .bind(("ids", ids))
            .await?
            .take(0)?;

        // Preserve the caller's article order
        let mut by_title: std::collections::HashMap<String, String> = rows
            .into_iter()
            .map(|r| (Self::article_of(&r.section_id).to_string(), r.content))
            .collect();

        Ok(article_titles
            .iter()
            .filter_map(|t| by_title.remove(t).map(|c| (t.clone(), c)))
            .collect())
    }

    /// All sections of one article ordered by index, for extraction input.
    pub async fn for_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<Vec<Section>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            out: Section,
        }

        let rows: Vec<Row> = db
            .query(
                "SELECT out, section_index FROM has_section WHERE in = $article ORDER BY section_index ASC FETCH out",
            )
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .take(0)?;

        Ok(rows.into_iter().map(|r| r.out).collect())
    }

    /// Number of `has_section` edges for one article.
    pub async fn edge_count(db: &SurrealDbClient, article_title: &str) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let rows: Vec<Row> = db
            .query("SELECT count() AS count FROM has_section WHERE in = $article GROUP ALL")
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |r| r.count.max(0) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::article::Article;
    use uuid::Uuid;

    async fn setup_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.redefine_vector_indexes(3)
            .await
            .expect("Failed to define vector indexes");
        db
    }

    fn section(article: &str, index: usize, embedding: Vec<f32>) -> Section {
        Section::new(
            article,
            index,
            format!("Section {index}"),
            "Some content that is long enough to matter.".to_string(),
            embedding,
            2,
        )
    }

    #[test]
    fn test_section_id_format() {
        assert_eq!(Section::section_id("Python (programming language)", 3),
            "Python (programming language)#3");
        assert_eq!(Section::article_of("Python (programming language)#3"),
            "Python (programming language)");
    }

    #[tokio::test]
    async fn test_create_and_count_edges() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store article");

        for i in 0..3 {
            Section::create_with_edge(&db, "A", i, section("A", i, vec![0.1, 0.2, 0.3]))
                .await
                .expect("create section");
        }

        assert_eq!(Section::edge_count(&db, "A").await.expect("count"), 3);

        let sections = Section::for_article(&db, "A").await.expect("sections");
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].id, "A#0");
        assert_eq!(sections[2].id, "A#2");
    }

    #[tokio::test]
    async fn test_delete_for_article_is_idempotent() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store article");

        Section::create_with_edge(&db, "A", 0, section("A", 0, vec![1.0, 0.0, 0.0]))
            .await
            .expect("create section");

        Section::delete_for_article(&db, "A").await.expect("delete");
        assert_eq!(Section::edge_count(&db, "A").await.expect("count"), 0);
        assert!(db
            .get_item::<Section>("A#0")
            .await
            .expect("fetch")
            .is_none());

        // Deleting again with nothing present is a no-op
        Section::delete_for_article(&db, "A").await.expect("delete");

        // Re-insert after delete must not collide
        Section::create_with_edge(&db, "A", 0, section("A", 0, vec![1.0, 0.0, 0.0]))
            .await
            .expect("re-create section");
        assert_eq!(Section::edge_count(&db, "A").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store a");
        db.store_item(Article::new_discovered("B", None, 0))
            .await
            .expect("store b");

        Section::create_with_edge(&db, "A", 0, section("A", 0, vec![1.0, 0.0, 0.0]))
            .await
            .expect("create a0");
        Section::create_with_edge(&db, "B", 0, section("B", 0, vec![0.0, 1.0, 0.0]))
            .await
            .expect("create b0");

        let hits = Section::vector_search(&db, vec![0.0, 1.0, 0.0], 2)
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].section_id, "B#0");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_lead_helpers() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store a");
        Section::create_with_edge(&db, "A", 0, section("A", 0, vec![0.5, 0.5, 0.0]))
            .await
            .expect("create a0");

        let emb = Section::lead_embedding(&db, "A")
            .await
            .expect("lead embedding");
        assert_eq!(emb, Some(vec![0.5, 0.5, 0.0]));
        assert_eq!(
            Section::lead_embedding(&db, "Missing")
                .await
                .expect("missing"),
            None
        );

        let contents = Section::lead_contents(&db, &["A".to_string(), "Missing".to_string()])
            .await
            .expect("lead contents");
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].0, "A");
    }
}
