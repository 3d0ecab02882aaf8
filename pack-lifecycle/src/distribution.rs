//! Pack distribution: `.tar.gz` packaging and hardened extraction.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use common::error::AppError;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tracing::info;

use crate::manifest::load_manifest;
use crate::validator::validate_pack_structure;

/// Whether a path is excluded from packaging: hidden entries, cache
/// directories, and scratch file extensions.
fn should_exclude(relative: &Path) -> bool {
    for component in relative.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        let part = part.to_string_lossy();
        if part == "__pycache__" || part == "cache" {
            return true;
        }
        if part.starts_with('.') {
            return true;
        }
    }

    matches!(
        relative.extension().and_then(|e| e.to_str()),
        Some("tmp" | "cache" | "log" | "pyc")
    )
}

fn collect_entries(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), AppError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let relative = path.strip_prefix(base).unwrap_or(&path).to_path_buf();
        if should_exclude(&relative) {
            continue;
        }
        out.push(path.clone());
        if path.is_dir() {
            collect_entries(base, &path, out)?;
        }
    }
    Ok(())
}

/// Create a `.tar.gz` archive from a pack directory. The pack is
/// validated first; archive member paths are relative to the pack root.
pub fn package_pack(pack_dir: &Path, output_path: &Path) -> Result<PathBuf, AppError> {
    if !pack_dir.exists() {
        return Err(AppError::NotFound(format!(
            "Pack directory not found: {}",
            pack_dir.display()
        )));
    }

    let errors = validate_pack_structure(pack_dir);
    if !errors.is_empty() {
        return Err(AppError::Validation(format!(
            "Invalid pack structure: {}",
            errors.join("; ")
        )));
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(output_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut entries = Vec::new();
    collect_entries(pack_dir, pack_dir, &mut entries)?;

    for path in entries {
        let name = path
            .strip_prefix(pack_dir)
            .map_err(|e| AppError::InternalError(format!("Archive path error: {e}")))?;
        if path.is_dir() {
            builder.append_dir(name, &path)?;
        } else {
            builder.append_path_with_name(&path, name)?;
        }
    }

    builder.into_inner()?.finish()?;
    info!(archive = %output_path.display(), "Packaged pack");

    Ok(output_path.to_path_buf())
}

/// Extract a pack archive into `install_dir/<pack name>/`.
///
/// Member paths are rejected when absolute or containing `..`, and
/// symlink/hardlink members are refused outright. The archive is
/// extracted to a temporary directory, validated, and only then moved
/// into place, replacing any existing installation.
pub fn unpackage_pack(archive_path: &Path, install_dir: &Path) -> Result<PathBuf, AppError> {
    if !archive_path.exists() {
        return Err(AppError::NotFound(format!(
            "Archive not found: {}",
            archive_path.display()
        )));
    }

    std::fs::create_dir_all(install_dir)?;
    // Staging inside the install dir keeps the final rename on one
    // filesystem, hence atomic
    let staging = tempfile::tempdir_in(install_dir)?;

    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(AppError::Security(format!(
                "Symlinks/hardlinks not allowed in pack archives: {}",
                path.display()
            )));
        }
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(AppError::Security(format!(
                "Invalid archive member path: {}",
                path.display()
            )));
        }

        entry.unpack(staging.path().join(&path))?;
    }

    let errors = validate_pack_structure(staging.path());
    if !errors.is_empty() {
        return Err(AppError::Validation(format!(
            "Pack validation failed: {}",
            errors.join("; ")
        )));
    }

    let manifest = load_manifest(staging.path())?;
    let final_path = install_dir.join(&manifest.name);

    if final_path.exists() {
        std::fs::remove_dir_all(&final_path)?;
    }
    std::fs::rename(staging.keep(), &final_path)?;

    info!(pack = manifest.name, path = %final_path.display(), "Installed pack");
    Ok(final_path)
}
