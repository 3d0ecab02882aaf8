use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::RecordId;

/// Expansion lifecycle of an article in the crawl queue.
///
/// Transitions are guarded in the store by conditional updates; see the
/// work queue for the legal predecessor table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionState {
    Discovered,
    Claimed,
    Loaded,
    Processed,
    Failed,
}

impl ExpansionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpansionState::Discovered => "discovered",
            ExpansionState::Claimed => "claimed",
            ExpansionState::Loaded => "loaded",
            ExpansionState::Processed => "processed",
            ExpansionState::Failed => "failed",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["discovered", "claimed", "loaded", "processed", "failed"]
    }
}

impl fmt::Display for ExpansionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(ExpansionState::Discovered),
            "claimed" => Ok(ExpansionState::Claimed),
            "loaded" => Ok(ExpansionState::Loaded),
            "processed" => Ok(ExpansionState::Processed),
            "failed" => Ok(ExpansionState::Failed),
            other => Err(AppError::Validation(format!(
                "Invalid expansion state: {other}. Must be one of {:?}",
                ExpansionState::variants()
            ))),
        }
    }
}

stored_object!(Article, "article", {
    title: String,
    category: Option<String>,
    word_count: i64,
    expansion_state: ExpansionState,
    expansion_depth: i64,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    processed_at: Option<DateTime<Utc>>,
    retry_count: i64
});

/// Row shape for batched title/state lookups.
#[derive(Debug, Deserialize)]
struct TitleStateRow {
    title: String,
    expansion_state: ExpansionState,
}

impl Article {
    /// A freshly discovered article, not yet fetched. The record key is the
    /// title itself, which makes re-discovery races collide on insert.
    pub fn new_discovered(title: &str, category: Option<String>, depth: i64) -> Self {
        let now = Utc::now();
        Self {
            id: title.to_string(),
            created_at: now,
            updated_at: now,
            title: title.to_string(),
            category,
            word_count: 0,
            expansion_state: ExpansionState::Discovered,
            expansion_depth: depth,
            claimed_at: None,
            processed_at: None,
            retry_count: 0,
        }
    }

    pub fn record_id(title: &str) -> RecordId {
        RecordId::from_table_key(Self::table_name(), title)
    }

    pub async fn get_by_title(
        db: &SurrealDbClient,
        title: &str,
    ) -> Result<Option<Article>, AppError> {
        Ok(db.get_item::<Article>(title).await?)
    }

    /// Batched existence check: returns the expansion state for every title
    /// that already has a node. Absent titles are simply missing from the map.
    pub async fn batch_states(
        db: &SurrealDbClient,
        titles: &[String],
    ) -> Result<HashMap<String, ExpansionState>, AppError> {
        if titles.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<TitleStateRow> = db
            .query("SELECT title, expansion_state FROM article WHERE title IN $titles")
            .bind(("titles", titles.to_vec()))
            .await?
            .take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.title, r.expansion_state))
            .collect())
    }

    /// Upserts the article node after a successful fetch. A pre-existing node
    /// (a seed stub or a rediscovered link) is updated in place; otherwise a
    /// new node is created directly in the `loaded` state.
    pub async fn upsert_loaded(
        db: &SurrealDbClient,
        title: &str,
        category: &str,
        word_count: i64,
        expansion_depth: i64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let existing = Self::get_by_title(db, title).await?;

        if existing.is_some() {
            db.query(
                "UPDATE type::thing('article', $title) SET
                    word_count = $word_count,
                    category = $category,
                    expansion_state = $state,
                    processed_at = $now,
                    updated_at = $now",
            )
            .bind(("title", title.to_string()))
            .bind(("word_count", word_count))
            .bind(("category", category.to_string()))
            .bind(("state", ExpansionState::Loaded))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?;
        } else {
            let mut article = Self::new_discovered(title, Some(category.to_string()), expansion_depth);
            article.word_count = word_count;
            article.expansion_state = ExpansionState::Loaded;
            article.processed_at = Some(now);
            db.store_item(article).await?;
        }

        Ok(())
    }

    /// All outgoing `links_to` targets of an article, fetched in one query so
    /// link discovery can dedup edges without N+1 lookups.
    pub async fn existing_link_targets(
        db: &SurrealDbClient,
        source_title: &str,
    ) -> Result<HashSet<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            title: Option<String>,
        }

        let rows: Vec<Row> = db
            .query("SELECT out.title AS title FROM links_to WHERE in = $source")
            .bind(("source", Self::record_id(source_title)))
            .await?
            .take(0)?;

        Ok(rows.into_iter().filter_map(|r| r.title).collect())
    }

    /// Creates a directed `links_to` edge. Callers are expected to have
    /// checked `existing_link_targets` first; the edge is not deduplicated
    /// here.
    pub async fn create_link(
        db: &SurrealDbClient,
        source_title: &str,
        target_title: &str,
        link_type: &str,
    ) -> Result<(), AppError> {
        db.query("RELATE $source->links_to->$target SET link_type = $link_type")
            .bind(("source", Self::record_id(source_title)))
            .bind(("target", Self::record_id(target_title)))
            .bind(("link_type", link_type.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Articles that have actual content, i.e. the expansion target metric.
    pub async fn loaded_count(db: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct Row {
            count: i64,
        }

        let rows: Vec<Row> = db
            .query("SELECT count() AS count FROM article WHERE word_count > 0 GROUP ALL")
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |r| r.count.max(0) as usize))
    }
}
