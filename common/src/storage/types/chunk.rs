use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

stored_object!(Chunk, "chunk", {
    content: String,
    embedding: Vec<f32>,
    article_title: String,
    section_index: i64,
    chunk_index: i64
});

impl Chunk {
    /// Chunk ids use `|` separators, which cannot occur in article titles:
    /// `"{title}|s{section_index}|c{chunk_index}"`.
    pub fn chunk_id(article_title: &str, section_index: usize, chunk_index: usize) -> String {
        format!("{article_title}|s{section_index}|c{chunk_index}")
    }

    pub fn new(
        article_title: &str,
        section_index: usize,
        chunk_index: usize,
        content: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::chunk_id(article_title, section_index, chunk_index),
            created_at: now,
            updated_at: now,
            content,
            embedding,
            article_title: article_title.to_string(),
            section_index: section_index as i64,
            chunk_index: chunk_index as i64,
        }
    }

    /// Deletes an article's chunks and `has_chunk` edges before re-insert.
    pub async fn delete_for_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<(), AppError> {
        db.query(
            "LET $chunks = (SELECT VALUE out FROM has_chunk WHERE in = $article);
             DELETE has_chunk WHERE in = $article;
             DELETE $chunks;",
        )
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn create_with_edge(db: &SurrealDbClient, chunk: Chunk) -> Result<(), AppError> {
        db.query(
            "CREATE type::thing('chunk', $chunk_id) CONTENT $chunk;
             RELATE (type::thing('article', $article))->has_chunk->(type::thing('chunk', $chunk_id))
                 SET section_index = $section_index, chunk_index = $chunk_index;",
        )
        .bind(("chunk_id", chunk.id.clone()))
        .bind(("article", chunk.article_title.clone()))
        .bind(("section_index", chunk.section_index))
        .bind(("chunk_index", chunk.chunk_index))
        .bind(("chunk", chunk))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn count_for_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let rows: Vec<Row> = db
            .query("SELECT count() AS count FROM chunk WHERE article_title = $title GROUP ALL")
            .bind(("title", article_title.to_string()))
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

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(Chunk::chunk_id("Alan Turing", 2, 1), "Alan Turing|s2|c1");
    }

    #[tokio::test]
    async fn test_create_delete_round_trip() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store article");

        let chunk = Chunk::new("A", 0, 0, "chunk text".to_string(), vec![0.1, 0.2, 0.3]);
        Chunk::create_with_edge(&db, chunk).await.expect("create");
        assert_eq!(Chunk::count_for_article(&db, "A").await.expect("count"), 1);

        Chunk::delete_for_article(&db, "A").await.expect("delete");
        assert_eq!(Chunk::count_for_article(&db, "A").await.expect("count"), 0);

        // Re-insert after delete must not collide on the chunk id
        let chunk = Chunk::new("A", 0, 0, "chunk text".to_string(), vec![0.1, 0.2, 0.3]);
        Chunk::create_with_edge(&db, chunk).await.expect("recreate");
        assert_eq!(Chunk::count_for_article(&db, "A").await.expect("count"), 1);
    }
}
