//! LLM-based entity, relationship, and fact extraction.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use common::{
    error::AppError, storage::types::entity::EntityType, utils::sanitize::sanitize_error,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sources::ParsedSection;

/// Extraction input is capped to keep per-article cost bounded.
const MAX_INPUT_CHARS: usize = 8000;
pub const DEFAULT_MAX_SECTIONS: usize = 5;

const SYSTEM_MESSAGE: &str = "You extract structured knowledge from encyclopedia articles. \
Respond with a single JSON object and nothing else.";

/// Canonical relation vocabulary. Extracted relations are normalized into
/// this set where a synonym mapping exists.
pub const STANDARD_RELATIONS: &[&str] = &[
    "founded",
    "invented",
    "discovered",
    "developed",
    "created",
    "led",
    "directed",
    "authored",
    "influenced",
    "inspired",
    "part_of",
    "uses",
    "requires",
    "caused",
    "resulted_in",
    "fought_in",
    "participated_in",
    "born_in",
    "died_in",
    "located_in",
    "related_to",
];

static RELATION_SYNONYMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("established", "founded"),
        ("co_founded", "founded"),
        ("cofounded", "founded"),
        ("set_up", "founded"),
        ("built", "created"),
        ("made", "created"),
        ("constructed", "created"),
        ("designed", "created"),
        ("devised", "invented"),
        ("conceived", "invented"),
        ("patented", "invented"),
        ("found", "discovered"),
        ("uncovered", "discovered"),
        ("identified", "discovered"),
        ("built_on", "developed"),
        ("advanced", "developed"),
        ("improved", "developed"),
        ("refined", "developed"),
        ("headed", "led"),
        ("managed", "led"),
        ("chaired", "led"),
        ("ran", "led"),
        ("supervised", "directed"),
        ("oversaw", "directed"),
        ("wrote", "authored"),
        ("published", "authored"),
        ("co_authored", "authored"),
        ("affected", "influenced"),
        ("impacted", "influenced"),
        ("shaped", "influenced"),
        ("motivated", "inspired"),
        ("component_of", "part_of"),
        ("member_of", "part_of"),
        ("belongs_to", "part_of"),
        ("subset_of", "part_of"),
        ("employs", "uses"),
        ("utilizes", "uses"),
        ("relies_on", "requires"),
        ("depends_on", "requires"),
        ("needs", "requires"),
        ("led_to", "caused"),
        ("triggered", "caused"),
        ("produced", "resulted_in"),
        ("generated", "resulted_in"),
        ("battled_in", "fought_in"),
        ("served_in", "participated_in"),
        ("engaged_in", "participated_in"),
        ("took_part_in", "participated_in"),
    ])
});

/// Normalize a relation: lowercase, spaces and hyphens to underscores,
/// then the synonym table. Unknown relations pass through normalized.
pub fn normalize_relation(relation: &str) -> String {
    let normalized = relation.trim().to_lowercase().replace([' ', '-'], "_");
    if STANDARD_RELATIONS.contains(&normalized.as_str()) {
        return normalized;
    }
    RELATION_SYNONYMS
        .get(normalized.as_str())
        .map_or(normalized, |canon| (*canon).to_string())
}

/// Broad subject domains used to steer extraction focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    History,
    Science,
    Biography,
    Geography,
}

impl Domain {
    const ALL: [Domain; 4] = [
        Domain::History,
        Domain::Science,
        Domain::Biography,
        Domain::Geography,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Domain::History => &[
                "history", "war", "battle", "revolution", "empire", "dynasty", "political",
                "government", "military", "colonial", "medieval",
            ],
            Domain::Science => &[
                "physics", "chemistry", "biology", "mathematics", "computer", "engineering",
                "technology", "algorithm", "quantum", "molecular",
            ],
            Domain::Biography => &[
                "people", "person", "biography", "leader", "president", "scientist", "artist",
                "writer", "philosopher", "musician",
            ],
            Domain::Geography => &[
                "country", "city", "region", "continent", "geography", "river", "mountain",
                "island", "ocean", "state",
            ],
        }
    }

    pub fn prompt_suffix(self) -> &'static str {
        match self {
            Domain::History => {
                "\n\nFocus especially on: causal relationships (what led to what), \
                 chronological sequences (before/after/during), key figures and their roles, \
                 alliances and conflicts between groups, and turning points."
            }
            Domain::Science => {
                "\n\nFocus especially on: taxonomic/hierarchical relationships (X is a type of Y), \
                 inventions and discoveries (who invented/discovered what, when), \
                 dependencies (X requires/uses Y), and experimental findings."
            }
            Domain::Biography => {
                "\n\nFocus especially on: life events (born, died, educated at), \
                 achievements and contributions, institutional affiliations, \
                 influences (who influenced whom), and notable works or creations."
            }
            Domain::Geography => {
                "\n\nFocus especially on: spatial relationships (located in, borders, contains), \
                 demographic facts (population, language, government type), \
                 natural features, and economic/cultural significance."
            }
        }
    }
}

/// Classify an article's domain by keyword-scoring its category strings.
/// Highest score wins; ties resolve in declaration order; zero means none.
pub fn detect_domain(categories: &[String]) -> Option<Domain> {
    if categories.is_empty() {
        return None;
    }
    let combined = categories.join(" ").to_lowercase();

    let mut best: Option<(Domain, usize)> = None;
    for domain in Domain::ALL {
        let score = domain
            .keywords()
            .iter()
            .filter(|kw| combined.contains(**kw))
            .count();
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((domain, score));
        }
    }
    best.map(|(d, _)| d)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub context: String,
}

/// Complete extraction from one article. Empty on any LLM or parse failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    pub key_facts: Vec<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.key_facts.is_empty()
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
    #[serde(default)]
    key_facts: Vec<String>,
}

#[derive(Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawRelationship {
    source: String,
    #[serde(default)]
    relation: Option<String>,
    target: String,
    #[serde(default)]
    context: Option<String>,
}

/// Strip markdown code fences some models wrap JSON responses in.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the model's JSON payload into a normalized extraction result.
pub fn parse_payload(content: &str) -> Result<ExtractionResult, AppError> {
    let raw: RawExtraction = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| AppError::LLMParsing(format!("Extraction payload parse failed: {e}")))?;

    let entities = raw
        .entities
        .into_iter()
        .map(|e| {
            let description = e
                .properties
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            ExtractedEntity {
                name: e.name,
                entity_type: EntityType::from(e.entity_type.unwrap_or_default()),
                description,
            }
        })
        .collect();

    let relationships = raw
        .relationships
        .into_iter()
        .map(|r| ExtractedRelationship {
            source: r.source,
            relation: normalize_relation(&r.relation.unwrap_or_else(|| "related_to".to_string())),
            target: r.target,
            context: r.context.unwrap_or_default(),
        })
        .collect();

    Ok(ExtractionResult {
        entities,
        relationships,
        key_facts: raw.key_facts,
    })
}

/// Assemble the extraction input: title plus the first N sections, capped.
fn build_input(title: &str, sections: &[ParsedSection], max_sections: usize) -> String {
    let mut combined = format!("# {title}\n\n");
    for section in sections.iter().take(max_sections) {
        if section.title.is_empty() {
            combined.push_str(&format!("{}\n\n", section.content));
        } else {
            combined.push_str(&format!("## {}\n{}\n\n", section.title, section.content));
        }
    }

    if combined.len() > MAX_INPUT_CHARS {
        let mut cut = MAX_INPUT_CHARS;
        while cut > 0 && !combined.is_char_boundary(cut) {
            cut -= 1;
        }
        combined.truncate(cut);
        combined.push_str("...[truncated]");
    }
    combined
}

fn build_prompt(input: &str, domain: Option<Domain>) -> String {
    let mut prompt = format!(
        r#"Extract structured knowledge from this article.

Article text:
{input}

Extract:
1. **Entities**: Named entities with their type (person/place/organization/concept/event)
2. **Relationships**: Connections between entities (who did what, what caused what, etc.)
3. **Key Facts**: 3-5 most important facts about the main topic

Return JSON in this format:
{{
  "entities": [
    {{"name": "Entity Name", "type": "person|place|organization|concept|event", "properties": {{"description": "..."}}}}
  ],
  "relationships": [
    {{"source": "Entity A", "relation": "founded", "target": "Entity B", "context": "sentence where this appears"}}
  ],
  "key_facts": [
    "Fact 1",
    "Fact 2"
  ]
}}

Focus on the most important entities and relationships. Be concise."#
    );

    if let Some(domain) = domain {
        prompt.push_str(domain.prompt_suffix());
    }
    prompt
}

/// Extracts entities, relationships, and key facts via the LLM.
pub struct LlmExtractor {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    max_sections: usize,
}

impl LlmExtractor {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self {
            client,
            model,
            max_sections: DEFAULT_MAX_SECTIONS,
        }
    }

    /// Runs extraction over an article's leading sections. Never fails:
    /// API and parse errors yield an empty result so article ingestion
    /// proceeds without the enrichment.
    pub async fn extract_from_article(
        &self,
        title: &str,
        sections: &[ParsedSection],
        domain: Option<Domain>,
    ) -> ExtractionResult {
        let input = build_input(title, sections, self.max_sections);
        let prompt = build_prompt(&input, domain);

        match self.perform_extraction(&prompt).await {
            Ok(result) => {
                debug!(
                    title,
                    entities = result.entities.len(),
                    relationships = result.relationships.len(),
                    facts = result.key_facts.len(),
                    "Extraction complete"
                );
                result
            }
            Err(e) => {
                warn!(
                    title,
                    error = %sanitize_error(&e.to_string()),
                    "LLM extraction failed, continuing without enrichment"
                );
                ExtractionResult::default()
            }
        }
    }

    async fn perform_extraction(&self, prompt: &str) -> Result<ExtractionResult, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(prompt).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        parse_payload(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relation_canonical_pass_through() {
        assert_eq!(normalize_relation("founded"), "founded");
        assert_eq!(normalize_relation("PART OF"), "part_of");
    }

    #[test]
    fn test_normalize_relation_synonyms() {
        assert_eq!(normalize_relation("established"), "founded");
        assert_eq!(normalize_relation("co-authored"), "authored");
        assert_eq!(normalize_relation("led to"), "caused");
        assert_eq!(normalize_relation("depends_on"), "requires");
        assert_eq!(normalize_relation("took part in"), "participated_in");
    }

    #[test]
    fn test_normalize_relation_unknown_kept_normalized() {
        assert_eq!(normalize_relation("Orbits Around"), "orbits_around");
    }

    #[test]
    fn test_detect_domain_scoring() {
        let science = vec![
            "Quantum mechanics".to_string(),
            "Physics concepts".to_string(),
        ];
        assert_eq!(detect_domain(&science), Some(Domain::Science));

        let history = vec!["Military history of France".to_string(), "Wars".to_string()];
        assert_eq!(detect_domain(&history), Some(Domain::History));

        assert_eq!(detect_domain(&[]), None);
        assert_eq!(detect_domain(&["Cooking recipes".to_string()]), None);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_payload_full() {
        let payload = r#"```json
        {
            "entities": [
                {"name": "Alan Turing", "type": "person", "properties": {"description": "Mathematician"}},
                {"name": "Enigma", "properties": {}}
            ],
            "relationships": [
                {"source": "Alan Turing", "relation": "led to", "target": "Enigma", "context": "Turing's work led to breaking Enigma."}
            ],
            "key_facts": ["Turing worked at Bletchley Park."]
        }
        ```"#;

        let result = parse_payload(payload).expect("parse");
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].entity_type, EntityType::Person);
        assert_eq!(result.entities[0].description, "Mathematician");
        // Missing type defaults to concept
        assert_eq!(result.entities[1].entity_type, EntityType::Concept);
        assert_eq!(result.relationships[0].relation, "caused");
        assert_eq!(result.key_facts.len(), 1);
    }

    #[test]
    fn test_parse_payload_garbage_errors() {
        assert!(parse_payload("not json at all").is_err());
    }

    #[test]
    fn test_build_input_truncates() {
        let sections = vec![ParsedSection {
            title: "Big".to_string(),
            content: "x".repeat(10_000),
            level: 2,
        }];
        let input = build_input("Title", &sections, 5);
        assert!(input.len() <= MAX_INPUT_CHARS + "...[truncated]".len());
        assert!(input.ends_with("...[truncated]"));
    }

    #[test]
    fn test_build_input_respects_max_sections() {
        let sections: Vec<ParsedSection> = (0..8)
            .map(|i| ParsedSection {
                title: format!("S{i}"),
                content: "content".to_string(),
                level: 2,
            })
            .collect();
        let input = build_input("Title", &sections, 5);
        assert!(input.contains("## S4"));
        assert!(!input.contains("## S5"));
    }
}
