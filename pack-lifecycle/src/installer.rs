//! Pack installation, removal, and upgrades.

use std::path::{Path, PathBuf};

use common::error::AppError;
use tracing::info;

use crate::distribution::unpackage_pack;
use crate::manifest::load_manifest;
use crate::registry::PackInfo;

/// Installs packs from archives into a local install directory.
pub struct PackInstaller {
    install_dir: PathBuf,
}

impl PackInstaller {
    pub fn new(install_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Install a pack from a `.tar.gz` archive.
    pub fn install_from_file(&self, archive_path: &Path) -> Result<PackInfo, AppError> {
        let pack_path = unpackage_pack(archive_path, &self.install_dir)?;
        let manifest = load_manifest(&pack_path)?;

        Ok(PackInfo {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            path: pack_path,
            manifest,
        })
    }

    /// Download a pack archive and install it.
    pub async fn install_from_url(&self, url: &str) -> Result<PackInfo, AppError> {
        let response = reqwest::get(url).await?;
        if !response.status().is_success() {
            return Err(AppError::NotFound(format!(
                "Pack download failed: {url}: status {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        let mut tmp = tempfile::NamedTempFile::with_suffix(".tar.gz")?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        self.install_from_file(tmp.path())
    }

    /// Remove an installed pack. Returns false when it was not installed.
    pub fn uninstall(&self, pack_name: &str) -> Result<bool, AppError> {
        let pack_path = self.install_dir.join(pack_name);
        if !pack_path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&pack_path)?;
        info!(pack = pack_name, "Uninstalled pack");
        Ok(true)
    }

    /// Upgrade an installed pack from a new archive, carrying the
    /// existing `eval/results/` over to the new version.
    pub fn update(&self, pack_name: &str, archive_path: &Path) -> Result<PackInfo, AppError> {
        let pack_path = self.install_dir.join(pack_name);
        if !pack_path.exists() {
            return Err(AppError::NotFound(format!("Pack not installed: {pack_name}")));
        }

        let eval_results = pack_path.join("eval/results");
        let saved_results = if eval_results.exists() {
            let stash = tempfile::tempdir()?;
            let saved = stash.path().join("results");
            copy_dir(&eval_results, &saved)?;
            Some((stash, saved))
        } else {
            None
        };

        let pack_info = self.install_from_file(archive_path)?;

        if let Some((_stash, saved)) = saved_results {
            let new_results = pack_info.path.join("eval/results");
            if new_results.exists() {
                std::fs::remove_dir_all(&new_results)?;
            }
            std::fs::create_dir_all(pack_info.path.join("eval"))?;
            copy_dir(&saved, &new_results)?;
            info!(pack = pack_name, "Preserved eval results across upgrade");
        }

        Ok(pack_info)
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::package_pack;
    use crate::validator::test_fixtures::write_valid_pack;

    fn build_archive(workspace: &Path, name: &str) -> PathBuf {
        let pack_dir = workspace.join(format!("src-{name}"));
        write_valid_pack(&pack_dir, name);
        let archive = workspace.join(format!("{name}.tar.gz"));
        package_pack(&pack_dir, &archive).expect("package");
        archive
    }

    #[test]
    fn test_install_and_uninstall() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let archive = build_archive(workspace.path(), "lifecycle-pack");
        let installer = PackInstaller::new(&workspace.path().join("packs"));

        let info = installer.install_from_file(&archive).expect("install");
        assert_eq!(info.name, "lifecycle-pack");
        assert_eq!(info.version, "1.0.0");
        assert!(info.path.exists());

        assert!(installer.uninstall("lifecycle-pack").expect("uninstall"));
        assert!(!info.path.exists());
        assert!(!installer.uninstall("lifecycle-pack").expect("second"));
    }

    #[test]
    fn test_update_preserves_eval_results() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let archive = build_archive(workspace.path(), "upgradable");
        let installer = PackInstaller::new(&workspace.path().join("packs"));

        let info = installer.install_from_file(&archive).expect("install");

        // Simulate an evaluation run on the installed pack
        let results_dir = info.path.join("eval/results");
        std::fs::create_dir_all(&results_dir).expect("results dir");
        std::fs::write(results_dir.join("run1.json"), r#"{"accuracy": 0.9}"#).expect("result");

        let updated = installer.update("upgradable", &archive).expect("update");
        let preserved = updated.path.join("eval/results/run1.json");
        assert!(preserved.exists());
        assert_eq!(
            std::fs::read_to_string(preserved).expect("read"),
            r#"{"accuracy": 0.9}"#
        );
    }

    #[test]
    fn test_update_requires_existing_install() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let archive = build_archive(workspace.path(), "ghost");
        let installer = PackInstaller::new(&workspace.path().join("packs"));

        assert!(matches!(
            installer.update("ghost", &archive),
            Err(AppError::NotFound(_))
        ));
    }
}
