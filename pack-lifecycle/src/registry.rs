//! Registry of installed packs, discovered from the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::error::AppError;
use tracing::{debug, warn};

use crate::manifest::{load_manifest, PackManifest};
use crate::validator::validate_pack_structure;

#[derive(Debug, Clone, PartialEq)]
pub struct PackInfo {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub manifest: PackManifest,
}

/// Tracks the valid packs under an install directory. A subdirectory is a
/// pack iff its structure validates cleanly; anything else is skipped
/// with a log line.
pub struct PackRegistry {
    packs_dir: PathBuf,
    packs: HashMap<String, PackInfo>,
}

impl PackRegistry {
    pub fn new(packs_dir: &Path) -> Result<Self, AppError> {
        let mut registry = Self {
            packs_dir: packs_dir.to_path_buf(),
            packs: HashMap::new(),
        };
        registry.refresh()?;
        Ok(registry)
    }

    /// Rescan the install directory, picking up added and removed packs.
    pub fn refresh(&mut self) -> Result<(), AppError> {
        self.packs.clear();

        if !self.packs_dir.exists() {
            debug!(dir = %self.packs_dir.display(), "Packs directory does not exist yet");
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.packs_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }

            let errors = validate_pack_structure(&path);
            if !errors.is_empty() {
                warn!(
                    dir = %path.display(),
                    problems = errors.len(),
                    "Skipping invalid pack directory"
                );
                continue;
            }

            match load_manifest(&path) {
                Ok(manifest) => {
                    self.packs.insert(
                        manifest.name.clone(),
                        PackInfo {
                            name: manifest.name.clone(),
                            version: manifest.version.clone(),
                            path: path.clone(),
                            manifest,
                        },
                    );
                }
                Err(e) => warn!(dir = %path.display(), error = %e, "Manifest load failed"),
            }
        }

        debug!(count = self.packs.len(), "Registry refreshed");
        Ok(())
    }

    pub fn get_pack(&self, name: &str) -> Option<&PackInfo> {
        self.packs.get(name)
    }

    /// All registered packs, sorted by name.
    pub fn list_packs(&self) -> Vec<&PackInfo> {
        let mut packs: Vec<&PackInfo> = self.packs.values().collect();
        packs.sort_by(|a, b| a.name.cmp(&b.name));
        packs
    }

    pub fn has_pack(&self, name: &str) -> bool {
        self.packs.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.packs.len()
    }
}
