use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

stored_object!(Category, "category", {
    name: String,
    article_count: i64
});

impl Category {
    /// Merge-creates the category (incrementing its article counter) and
    /// links the article to it.
    pub async fn upsert_and_link(
        db: &SurrealDbClient,
        article_title: &str,
        name: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPSERT type::thing('category', $name) SET
                name = $name,
                article_count = IF article_count != NONE THEN article_count + 1 ELSE 1 END,
                created_at = IF created_at != NONE THEN created_at ELSE time::now() END,
                updated_at = time::now();
             RELATE $article->in_category->(type::thing('category', $name));",
        )
        .bind(("name", name.to_string()))
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .await?
        .check()?;
        Ok(())
    }

    /// Removes an article's category edges (the categories themselves stay,
    /// they are shared across articles).
    pub async fn unlink_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE in_category WHERE in = $article")
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn edge_count(db: &SurrealDbClient, article_title: &str) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let rows: Vec<Row> = db
            .query("SELECT count() AS count FROM in_category WHERE in = $article GROUP ALL")
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
        SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_upsert_increments_count() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store a");
        db.store_item(Article::new_discovered("B", None, 0))
            .await
            .expect("store b");

        Category::upsert_and_link(&db, "A", "Science")
            .await
            .expect("link a");
        Category::upsert_and_link(&db, "B", "Science")
            .await
            .expect("link b");

        let category = db
            .get_item::<Category>("Science")
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(category.article_count, 2);
    }

    #[tokio::test]
    async fn test_unlink_keeps_category_node() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store a");

        Category::upsert_and_link(&db, "A", "History")
            .await
            .expect("link");
        assert_eq!(Category::edge_count(&db, "A").await.expect("count"), 1);

        Category::unlink_article(&db, "A").await.expect("unlink");
        assert_eq!(Category::edge_count(&db, "A").await.expect("count"), 0);
        assert!(db
            .get_item::<Category>("History")
            .await
            .expect("fetch")
            .is_some());
    }
}
