//! Entity-level graph queries: lookup, relationship paths, and facts.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{entity::Entity, fact::Fact},
    },
};

/// Aggregated view of an entity across the articles that mention it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub source_articles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPath {
    pub source: String,
    pub target: String,
    pub hops: usize,
    pub relations: Vec<String>,
}

/// Find an entity by name. Entities are stored per-article; this
/// aggregates the nodes sharing the name and lists every mentioning
/// article.
pub async fn find_entity(
    db: &Arc<SurrealDbClient>,
    name: &str,
) -> Result<Option<EntityInfo>, AppError> {
    let entities = Entity::find_by_name(db, name).await?;
    let Some(first) = entities.first() else {
        return Ok(None);
    };

    // Prefer the longest description among duplicates
    let description = entities
        .iter()
        .map(|e| e.description.as_str())
        .max_by_key(|d| d.len())
        .unwrap_or_default()
        .to_string();

    let entity_type = serde_json::to_value(first.entity_type)
        .ok()
        .and_then(|v| v.as_str().map(std::string::ToString::to_string))
        .unwrap_or_else(|| "concept".to_string());

    let source_articles = Entity::source_articles(db, name).await?;

    Ok(Some(EntityInfo {
        name: first.name.clone(),
        entity_type,
        description,
        source_articles,
    }))
}

/// Shortest relationship paths between two entity names, found by BFS over
/// `entity_relation` edges with an explicit visited set. At most 5 paths,
/// ordered by hop count.
pub async fn find_relationship_path(
    db: &Arc<SurrealDbClient>,
    source: &str,
    target: &str,
    max_hops: usize,
) -> Result<Vec<RelationshipPath>, AppError> {
    if !(1..=10).contains(&max_hops) {
        return Err(AppError::Validation(format!(
            "max_hops must be between 1 and 10, got {max_hops}"
        )));
    }

    let mut paths = Vec::new();
    let mut visited: HashSet<String> = HashSet::from([source.to_string()]);
    // Queue of (entity name, relations taken so far)
    let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
    queue.push_back((source.to_string(), Vec::new()));

    while let Some((current, relations)) = queue.pop_front() {
        if relations.len() >= max_hops || paths.len() >= 5 {
            continue;
        }

        for edge in Entity::outgoing_relations(db, &current).await? {
            let mut extended = relations.clone();
            extended.push(edge.relation.clone());

            if edge.target == target {
                paths.push(RelationshipPath {
                    source: source.to_string(),
                    target: target.to_string(),
                    hops: extended.len(),
                    relations: extended,
                });
                if paths.len() >= 5 {
                    break;
                }
                continue;
            }

            if visited.insert(edge.target.clone()) {
                queue.push_back((edge.target, extended));
            }
        }
    }

    paths.sort_by_key(|p| p.hops);
    Ok(paths)
}

/// Facts about an article title or an entity name. Article facts are
/// checked first; entity names fall through to the facts of every article
/// mentioning the entity.
pub async fn get_entity_facts(
    db: &Arc<SurrealDbClient>,
    entity_or_article: &str,
) -> Result<Vec<String>, AppError> {
    let article_facts = Fact::for_article(db, entity_or_article, 100).await?;
    if !article_facts.is_empty() {
        return Ok(article_facts);
    }

    Fact::for_entity(db, entity_or_article).await
}
