use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

stored_object!(Fact, "fact", {
    content: String
});

impl Fact {
    /// Facts are article-owned: `"{article_title}|fact{index}"`.
    pub fn fact_id(article_title: &str, index: usize) -> String {
        format!("{article_title}|fact{index}")
    }

    pub fn new(article_title: &str, index: usize, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Self::fact_id(article_title, index),
            created_at: now,
            updated_at: now,
            content,
        }
    }

    pub async fn upsert_and_link(
        db: &SurrealDbClient,
        article_title: &str,
        fact: Fact,
    ) -> Result<(), AppError> {
        db.query(
            "UPSERT type::thing('fact', $fact_id) CONTENT $fact;
             RELATE $article->has_fact->(type::thing('fact', $fact_id));",
        )
        .bind(("fact_id", fact.id.clone()))
        .bind(("fact", fact))
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn unlink_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE has_fact WHERE in = $article")
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .check()?;
        Ok(())
    }

    /// Facts asserted by one article.
    pub async fn for_article(
        db: &SurrealDbClient,
        article_title: &str,
        limit: usize,
    ) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            content: Option<String>,
        }

        let rows: Vec<Row> = db
            .query(format!(
                "SELECT out.content AS content FROM has_fact WHERE in = $article LIMIT {limit}"
            ))
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .take(0)?;

        Ok(rows.into_iter().filter_map(|r| r.content).collect())
    }

    /// Facts from every article that mentions an entity name.
    pub async fn for_entity(db: &SurrealDbClient, name: &str) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            title: Option<String>,
        }

        let rows: Vec<Row> = db
            .query("SELECT in.title AS title FROM has_entity WHERE out.name = $name")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        let mut facts = Vec::new();
        for row in rows {
            if let Some(title) = row.title {
                facts.extend(Fact::for_article(db, &title, 50).await?);
            }
        }
        facts.dedup();
        Ok(facts)
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
    async fn test_facts_round_trip() {
        let db = setup_db().await;
        db.store_item(Article::new_discovered("A", None, 0))
            .await
            .expect("store a");

        for (i, text) in ["First fact.", "Second fact."].iter().enumerate() {
            Fact::upsert_and_link(&db, "A", Fact::new("A", i, (*text).to_string()))
                .await
                .expect("fact");
        }

        let mut facts = Fact::for_article(&db, "A", 10).await.expect("facts");
        facts.sort();
        assert_eq!(facts, vec!["First fact.".to_string(), "Second fact.".to_string()]);

        Fact::unlink_article(&db, "A").await.expect("unlink");
        assert!(Fact::for_article(&db, "A", 10)
            .await
            .expect("facts")
            .is_empty());
    }
}
