use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

/// Entity categories the extractor is allowed to emit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Place,
    Organization,
    Concept,
    Event,
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "person" => EntityType::Person,
            "place" => EntityType::Place,
            "organization" | "org" => EntityType::Organization,
            "event" => EntityType::Event,
            _ => EntityType::Concept, // Default case
        }
    }
}

stored_object!(Entity, "entity", {
    name: String,
    entity_type: EntityType,
    description: String
});

/// One directed, typed relation between two extracted entities.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityRelationRow {
    pub source: String,
    pub relation: String,
    pub target: String,
}

impl Entity {
    /// Entities are article-scoped: `"{article_title}|{entity_name}"`.
    /// The same real-world entity mentioned by two articles gets two nodes;
    /// query-time aggregation groups them by name.
    pub fn entity_id(article_title: &str, entity_name: &str) -> String {
        format!("{article_title}|{entity_name}")
    }

    pub fn new(
        article_title: &str,
        name: String,
        entity_type: EntityType,
        description: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::entity_id(article_title, &name),
            created_at: now,
            updated_at: now,
            name,
            entity_type,
            description,
        }
    }

    /// Upserts the entity node and links the owning article to it.
    pub async fn upsert_and_link(
        db: &SurrealDbClient,
        article_title: &str,
        entity: Entity,
    ) -> Result<(), AppError> {
        db.query(
            "UPSERT type::thing('entity', $entity_id) CONTENT $entity;
             RELATE $article->has_entity->(type::thing('entity', $entity_id));",
        )
        .bind(("entity_id", entity.id.clone()))
        .bind(("entity", entity))
        .bind((
            "article",
            RecordId::from_table_key("article", article_title),
        ))
        .await?
        .check()?;
        Ok(())
    }

    /// Removes an article's `has_entity` edges. Entity nodes are left in
    /// place and overwritten by the next upsert.
    pub async fn unlink_article(
        db: &SurrealDbClient,
        article_title: &str,
    ) -> Result<(), AppError> {
        db.query("DELETE has_entity WHERE in = $article")
            .bind((
                "article",
                RecordId::from_table_key("article", article_title),
            ))
            .await?
            .check()?;
        Ok(())
    }

    /// Creates an `entity_relation` edge between two entity ids.
    pub async fn relate(
        db: &SurrealDbClient,
        source_id: &str,
        target_id: &str,
        relation: &str,
        context: &str,
    ) -> Result<(), AppError> {
        db.query(
            "RELATE $source->entity_relation->$target
                 SET relation = $relation, context = $context",
        )
        .bind(("source", RecordId::from_table_key("entity", source_id)))
        .bind(("target", RecordId::from_table_key("entity", target_id)))
        .bind(("relation", relation.to_string()))
        .bind(("context", context.to_string()))
        .await?
        .check()?;
        Ok(())
    }

    /// All entity nodes sharing a name, across owning articles.
    pub async fn find_by_name(
        db: &SurrealDbClient,
        name: &str,
    ) -> Result<Vec<Entity>, AppError> {
        Ok(db
            .query("SELECT * FROM entity WHERE name = $name")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?)
    }

    /// Titles of the articles that mention an entity name.
    pub async fn source_articles(
        db: &SurrealDbClient,
        name: &str,
    ) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            title: Option<String>,
        }

        let rows: Vec<Row> = db
            .query("SELECT in.title AS title FROM has_entity WHERE out.name = $name")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        let mut titles: Vec<String> = rows.into_iter().filter_map(|r| r.title).collect();
        titles.sort();
        titles.dedup();
        Ok(titles)
    }

    /// Outgoing relations from every entity node with the given name.
    pub async fn outgoing_relations(
        db: &SurrealDbClient,
        name: &str,
    ) -> Result<Vec<EntityRelationRow>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            source: Option<String>,
            relation: String,
            target: Option<String>,
        }

        let rows: Vec<Row> = db
            .query(
                "SELECT in.name AS source, relation, out.name AS target
                 FROM entity_relation WHERE in.name = $name",
            )
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| match (r.source, r.target) {
                (Some(source), Some(target)) => Some(EntityRelationRow {
                    source,
                    relation: r.relation,
                    target,
                }),
                _ => None,
            })
            .collect())
    }
}
