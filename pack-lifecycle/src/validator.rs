//! Structural validation of a pack directory.

use std::path::Path;

use crate::manifest::{load_manifest, validate_manifest};

/// Validate the complete pack layout, returning every problem found.
///
/// Required: a valid `manifest.json`, `pack.db` (file or directory,
/// depending on the storage engine), `skill.md`, and a `kg_config.json`
/// that parses as JSON. `README.md` and `eval/` are optional.
pub fn validate_pack_structure(pack_dir: &Path) -> Vec<String> {
    let mut errors = Vec::new();

    let manifest_path = pack_dir.join("manifest.json");
    if manifest_path.exists() {
        match load_manifest(pack_dir) {
            Ok(manifest) => errors.extend(validate_manifest(&manifest)),
            Err(e) => errors.push(format!("Error loading manifest.json: {e}")),
        }
    } else {
        errors.push("Required file missing: manifest.json".to_string());
    }

    if !pack_dir.join("pack.db").exists() {
        errors.push("Required database missing: pack.db".to_string());
    }

    if !pack_dir.join("skill.md").exists() {
        errors.push("Required file missing: skill.md".to_string());
    }

    let kg_config_path = pack_dir.join("kg_config.json");
    if kg_config_path.exists() {
        match std::fs::read_to_string(&kg_config_path) {
            Ok(content) => {
                if serde_json::from_str::<serde_json::Value>(&content).is_err() {
                    errors.push("Invalid JSON in kg_config.json".to_string());
                }
            }
            Err(e) => errors.push(format!("Error reading kg_config.json: {e}")),
        }
    } else {
        errors.push("Required file missing: kg_config.json".to_string());
    }

    errors
}
