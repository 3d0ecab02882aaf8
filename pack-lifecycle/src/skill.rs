//! Skill descriptor generation: the `skill.md` that surfaces a pack to
//! an agent runtime.

use std::path::Path;

use crate::manifest::PackManifest;

/// Trigger keywords derived from the pack name. The base trigger is the
/// name with the `-expert` suffix dropped; well-known domains add a pair
/// of topical triggers.
fn trigger_keywords(name: &str) -> Vec<String> {
    let base = name.replace("-expert", "").replace('-', " ");
    let mut triggers = vec![base];

    let lower = name.to_lowercase();
    if lower.contains("physics") {
        triggers.extend(["quantum".to_string(), "relativity".to_string()]);
    } else if lower.contains("biology") {
        triggers.extend(["evolution".to_string(), "genetics".to_string()]);
    } else if lower.contains("history") {
        triggers.extend(["historical".to_string(), "timeline".to_string()]);
    }

    triggers.truncate(5);
    triggers
}

fn title_case(words: &str) -> String {
    words
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the complete `skill.md` for a pack: YAML frontmatter with
/// triggers, a stats overview, usage examples, quality metrics when eval
/// scores exist, and the source list.
pub fn generate_skill_md(manifest: &PackManifest, kg_config_path: &Path) -> String {
    let triggers = trigger_keywords(&manifest.name);
    let base_trigger = triggers.first().cloned().unwrap_or_default();
    let stats = &manifest.graph_stats;

    let mut lines = vec![
        "---".to_string(),
        format!("name: {}", manifest.name),
        format!("version: {}", manifest.version),
        format!("description: {}", manifest.description),
        "triggers:".to_string(),
    ];
    for trigger in &triggers {
        lines.push(format!("  - \"{trigger}\""));
    }
    lines.push("---".to_string());

    lines.extend([
        String::new(),
        format!("# {} Skill", title_case(&manifest.name.replace('-', " "))),
        String::new(),
        format!(
            "Knowledge graph: {} articles, {} entities, {} relationships",
            stats.articles, stats.entities, stats.relationships
        ),
        String::new(),
        "## Overview".to_string(),
        String::new(),
        manifest.description.clone(),
        String::new(),
        "## Usage".to_string(),
        String::new(),
        "This skill provides deep domain expertise through a knowledge graph.".to_string(),
        "Ask questions naturally and the skill will retrieve relevant information".to_string(),
        "from the graph database.".to_string(),
        String::new(),
        "**Example queries:**".to_string(),
        format!("- \"Explain {base_trigger} concepts\""),
        format!("- \"What is the relationship between X and Y in {base_trigger}?\""),
        format!("- \"Find articles about [topic] in {base_trigger}\""),
    ]);

    if let Some(scores) = &manifest.eval_scores {
        lines.extend([
            String::new(),
            "**Quality Metrics:**".to_string(),
            format!("- Accuracy: {:.1}%", scores.accuracy * 100.0),
            format!("- Hallucination Rate: {:.1}%", scores.hallucination_rate * 100.0),
            format!("- Citation Quality: {:.1}%", scores.citation_quality * 100.0),
        ]);
    }

    lines.extend([
        String::new(),
        "## Technical Details".to_string(),
        String::new(),
        format!("- Database: graph store at `pack.db` ({} MB)", stats.size_mb),
        format!("- Configuration: `{}`", kg_config_path.display()),
        format!("- License: {}", manifest.license),
    ]);

    if let Some(urls) = &manifest.source_urls {
        lines.extend([
            String::new(),
            "## Sources".to_string(),
            String::new(),
            "This knowledge pack was created from:".to_string(),
        ]);
        for url in urls {
            lines.push(format!("- {url}"));
        }
    }

    lines.extend([
        String::new(),
        "## Integration".to_string(),
        String::new(),
        "Open the pack database read-only and route user questions through the".to_string(),
        "query engine; answers come back with cited source articles.".to_string(),
        String::new(),
        "**Retrieval Strategy:**".to_string(),
        "1. **Vector Search**: Find semantically similar content".to_string(),
        "2. **Graph Traversal**: Navigate relationships between entities".to_string(),
        "3. **Hybrid Search**: Combine vector similarity with graph structure".to_string(),
        String::new(),
        format!("Created: {}", manifest.created_at.as_deref().unwrap_or("unknown")),
    ]);

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EvalScores, GraphStats, PackManifest};

    fn manifest(name: &str) -> PackManifest {
        let mut manifest = PackManifest::new(
            name,
            "1.0.0",
            "Expert knowledge for testing",
            "MIT",
            GraphStats {
                articles: 100,
                entities: 50,
                relationships: 25,
                size_mb: 10,
            },
        );
        manifest.source_urls = Some(vec!["https://example.com/a".to_string()]);
        manifest
    }

    #[test]
    fn test_physics_pack_gets_domain_triggers() {
        let triggers = trigger_keywords("physics-expert");
        assert_eq!(triggers, vec!["physics", "quantum", "relativity"]);
    }

    #[test]
    fn test_generic_pack_gets_base_trigger_only() {
        assert_eq!(trigger_keywords("rust-docs"), vec!["rust docs"]);
    }

    #[test]
    fn test_skill_md_structure() {
        let skill = generate_skill_md(&manifest("physics-expert"), Path::new("kg_config.json"));

        assert!(skill.starts_with("---\n"));
        assert!(skill.contains("name: physics-expert"));
        assert!(skill.contains("version: 1.0.0"));
        assert!(skill.contains("  - \"physics\""));
        assert!(skill.contains("  - \"quantum\""));
        assert!(skill.contains("# Physics Expert Skill"));
        assert!(skill.contains("100 articles, 50 entities, 25 relationships"));
        assert!(skill.contains("https://example.com/a"));
        // No eval scores, no metrics block
        assert!(!skill.contains("Quality Metrics"));
    }

    #[test]
    fn test_skill_md_includes_metrics_when_scored() {
        let mut m = manifest("biology-expert");
        m.eval_scores = Some(EvalScores {
            accuracy: 0.925,
            hallucination_rate: 0.031,
            citation_quality: 0.88,
        });

        let skill = generate_skill_md(&m, Path::new("kg_config.json"));
        assert!(skill.contains("Quality Metrics"));
        assert!(skill.contains("Accuracy: 92.5%"));
        assert!(skill.contains("  - \"evolution\""));
    }
}
