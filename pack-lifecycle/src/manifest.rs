//! Pack manifest model, I/O, and validation.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use common::error::AppError;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[\w.]+)?(\+[\w.]+)?$").expect("valid semver pattern")
});

/// Statistics about the knowledge graph in a pack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub articles: i64,
    pub entities: i64,
    pub relationships: i64,
    pub size_mb: i64,
}

/// Evaluation scores for pack quality, each in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalScores {
    pub accuracy: f64,
    pub hallucination_rate: f64,
    pub citation_quality: f64,
}

/// Pack metadata, serialized as `manifest.json`.
///
/// `created` is the legacy timestamp field; `created_at` is primary.
/// Loading resolves one from the other so old manifests stay readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub graph_stats: GraphStats,
    pub license: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eval_scores: Option<EvalScores>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_urls: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub topics: Option<Vec<String>>,
}

impl PackManifest {
    pub fn new(name: &str, version: &str, description: &str, license: &str, stats: GraphStats) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            graph_stats: stats,
            license: license.to_string(),
            eval_scores: None,
            source_urls: None,
            created_at: Some(now_timestamp()),
            created: None,
            author: None,
            topics: None,
        }
    }

    /// Resolve the `created`/`created_at` alias pair, defaulting to now
    /// when neither is present.
    fn normalize(&mut self) {
        if self.created_at.is_none() {
            self.created_at = self
                .created
                .clone()
                .or_else(|| Some(now_timestamp()));
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339().replace("+00:00", "Z")
}

/// Load `manifest.json` from a pack directory.
pub fn load_manifest(pack_dir: &Path) -> Result<PackManifest, AppError> {
    let manifest_path = pack_dir.join("manifest.json");
    if !manifest_path.exists() {
        return Err(AppError::NotFound(format!(
            "manifest.json not found in {}",
            pack_dir.display()
        )));
    }

    let content = std::fs::read_to_string(&manifest_path)?;
    let mut manifest: PackManifest = serde_json::from_str(&content)?;
    manifest.normalize();
    Ok(manifest)
}

/// Save a manifest as pretty-printed JSON with a trailing newline.
pub fn save_manifest(manifest: &PackManifest, pack_dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(pack_dir)?;
    let mut json = serde_json::to_string_pretty(manifest)?;
    json.push('\n');
    std::fs::write(pack_dir.join("manifest.json"), json)?;
    Ok(())
}

/// Validate a manifest, returning every problem found (empty when valid).
pub fn validate_manifest(manifest: &PackManifest) -> Vec<String> {
    let mut errors = Vec::new();

    if manifest.name.trim().is_empty() {
        errors.push("Pack name cannot be empty".to_string());
    }

    if !SEMVER.is_match(&manifest.version) {
        errors.push(format!("Invalid semantic version: {}", manifest.version));
    }

    if manifest.description.trim().is_empty() {
        errors.push("Pack description cannot be empty".to_string());
    }

    let stats = &manifest.graph_stats;
    if stats.articles < 0 {
        errors.push("Graph stats articles cannot be negative".to_string());
    }
    if stats.entities < 0 {
        errors.push("Graph stats entities cannot be negative".to_string());
    }
    if stats.relationships < 0 {
        errors.push("Graph stats relationships cannot be negative".to_string());
    }
    if stats.size_mb < 0 {
        errors.push("Graph stats size_mb cannot be negative".to_string());
    }

    if let Some(scores) = &manifest.eval_scores {
        if !(0.0..=1.0).contains(&scores.accuracy) {
            errors.push("Eval score accuracy must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&scores.hallucination_rate) {
            errors.push("Eval score hallucination_rate must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&scores.citation_quality) {
            errors.push("Eval score citation_quality must be between 0 and 1".to_string());
        }
    }

    if let Some(urls) = &manifest.source_urls {
        if urls.is_empty() {
            errors.push("source_urls list cannot be empty (omit it if not applicable)".to_string());
        }
    }

    match &manifest.created_at {
        Some(timestamp) => {
            let parseable = DateTime::parse_from_rfc3339(&timestamp.replace('Z', "+00:00"));
            if parseable.is_err() {
                errors.push(format!("Invalid ISO 8601 timestamp for created_at: {timestamp}"));
            }
        }
        None => errors.push("Missing created_at timestamp".to_string()),
    }

    if manifest.license.trim().is_empty() {
        errors.push("Pack license cannot be empty".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackManifest {
        PackManifest {
            name: "physics-expert".to_string(),
            version: "1.2.0".to_string(),
            description: "Physics knowledge pack".to_string(),
            graph_stats: GraphStats {
                articles: 120,
                entities: 800,
                relationships: 450,
                size_mb: 32,
            },
            license: "CC-BY-SA-4.0".to_string(),
            eval_scores: Some(EvalScores {
                accuracy: 0.91,
                hallucination_rate: 0.04,
                citation_quality: 0.88,
            }),
            source_urls: Some(vec!["https://en.wikipedia.org/wiki/Physics".to_string()]),
            created_at: Some("2026-01-15T10:30:00Z".to_string()),
            created: None,
            author: Some("builder".to_string()),
            topics: Some(vec!["physics".to_string()]),
        }
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert!(validate_manifest(&sample()).is_empty());
    }

    #[test]
    fn test_semver_validation() {
        let mut manifest = sample();
        for bad in ["1.2", "v1.2.0", "1.2.0.0", "abc"] {
            manifest.version = bad.to_string();
            assert!(
                validate_manifest(&manifest)
                    .iter()
                    .any(|e| e.contains("semantic version")),
                "version {bad} should fail"
            );
        }
        for good in ["0.1.0", "1.2.3-beta.1", "1.2.3+build.5", "1.2.3-rc.1+meta"] {
            manifest.version = good.to_string();
            assert!(
                !validate_manifest(&manifest)
                    .iter()
                    .any(|e| e.contains("semantic version")),
                "version {good} should pass"
            );
        }
    }

    #[test]
    fn test_negative_stats_rejected() {
        let mut manifest = sample();
        manifest.graph_stats.articles = -1;
        assert!(validate_manifest(&manifest)
            .iter()
            .any(|e| e.contains("articles")));
    }

    #[test]
    fn test_eval_scores_out_of_range() {
        let mut manifest = sample();
        manifest.eval_scores = Some(EvalScores {
            accuracy: 1.5,
            hallucination_rate: 0.1,
            citation_quality: 0.5,
        });
        assert!(validate_manifest(&manifest)
            .iter()
            .any(|e| e.contains("accuracy")));
    }

    #[test]
    fn test_empty_source_urls_rejected() {
        let mut manifest = sample();
        manifest.source_urls = Some(vec![]);
        assert!(validate_manifest(&manifest)
            .iter()
            .any(|e| e.contains("source_urls")));
    }

    #[test]
    fn test_empty_name_description_license_rejected() {
        let mut manifest = sample();
        manifest.name = "  ".to_string();
        manifest.description = String::new();
        manifest.license = String::new();
        let errors = validate_manifest(&manifest);
        assert!(errors.iter().any(|e| e.contains("name")));
        assert!(errors.iter().any(|e| e.contains("description")));
        assert!(errors.iter().any(|e| e.contains("license")));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut manifest = sample();
        manifest.created_at = Some("yesterday".to_string());
        assert!(validate_manifest(&manifest)
            .iter()
            .any(|e| e.contains("ISO 8601")));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = sample();

        save_manifest(&manifest, dir.path()).expect("save");
        let loaded = load_manifest(dir.path()).expect("load");
        assert_eq!(manifest, loaded);

        // Trailing newline is part of the format
        let raw = std::fs::read_to_string(dir.path().join("manifest.json")).expect("read");
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_legacy_created_field_resolves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let json = r#"{
            "name": "old-pack",
            "version": "0.1.0",
            "description": "Legacy manifest",
            "graph_stats": {"articles": 1, "entities": 0, "relationships": 0, "size_mb": 1},
            "license": "MIT",
            "created": "2024-06-01T00:00:00Z"
        }"#;
        std::fs::write(dir.path().join("manifest.json"), json).expect("write");

        let manifest = load_manifest(dir.path()).expect("load");
        assert_eq!(manifest.created_at.as_deref(), Some("2024-06-01T00:00:00Z"));
        assert!(validate_manifest(&manifest).is_empty());
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            load_manifest(dir.path()),
            Err(AppError::NotFound(_))
        ));
    }
}
