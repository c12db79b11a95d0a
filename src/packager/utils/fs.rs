//! Timestamp-preserving file operations for deliverable fan-out.
//!
//! A destination counts as current when its modification time equals the
//! source's. Every copy stamps the destination with the source's time, so a
//! second fan-out over unchanged inputs copies nothing.

use crate::packager::artifact::{self, ArtifactKind};
use crate::packager::error::{ErrorExt, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Creates `path` and its parents, succeeding if it already exists.
pub fn create_dir_all(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).fs_context("creating directory", path)
}

/// Removes a file, ignoring `NotFound`.
pub fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).fs_context("removing file", path),
    }
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Sets the modification time of an existing file.
pub fn set_modified(path: &Path, time: SystemTime) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .fs_context("opening file to set timestamp", path)?;
    file.set_modified(time)
        .fs_context("setting modification time", path)
}

/// Copies `from` to `to` unless both carry the same modification time.
///
/// Returns `true` if the file was copied.
pub fn copy_if_changed(from: &Path, to: &Path) -> Result<bool> {
    let source_time = std::fs::metadata(from)
        .and_then(|m| m.modified())
        .fs_context("reading source timestamp", from)?;

    if modified(to) == Some(source_time) {
        return Ok(false);
    }

    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    std::fs::copy(from, to).fs_context("copying to", to)?;
    set_modified(to, source_time)?;
    log::debug!("copied {} -> {}", from.display(), to.display());
    Ok(true)
}

/// Artifacts directly in `dir` that belong to the family of `base_name`,
/// optionally restricted to one kind. Sorted by name.
pub fn family_files(dir: &Path, base_name: &str, kind: Option<ArtifactKind>) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).fs_context("reading directory", dir),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.fs_context("reading directory entry in", dir)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !artifact::belongs_to(name, base_name) {
            continue;
        }
        let Some(found) = ArtifactKind::of_path(&path) else {
            continue;
        };
        if kind.is_some_and(|k| k != found) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// First phase of an atomic replacement: removes every matching file.
pub fn erase_family(dir: &Path, base_name: &str, kind: Option<ArtifactKind>) -> Result<usize> {
    let files = family_files(dir, base_name, kind)?;
    for file in &files {
        remove_file(file)?;
    }
    Ok(files.len())
}

/// Second phase: copies the new set into `dir`.
pub fn copy_into(sources: &[PathBuf], dir: &Path) -> Result<usize> {
    let mut copied = 0;
    for source in sources {
        let name = source
            .file_name()
            .ok_or_else(|| crate::packager::Error::GenericError(format!(
                "{} has no file name",
                source.display()
            )))?;
        if copy_if_changed(source, &dir.join(name))? {
            copied += 1;
        }
    }
    Ok(copied)
}

/// Replaces the artifact family of `base_name` in `dir` with `sources`,
/// erasing first so old and new sibling numbering never mix.
pub fn replace_family(
    sources: &[PathBuf],
    dir: &Path,
    base_name: &str,
    kind: Option<ArtifactKind>,
) -> Result<usize> {
    let erased = erase_family(dir, base_name, kind)?;
    log::debug!("erased {} stale file(s) of {} in {}", erased, base_name, dir.display());
    copy_into(sources, dir)
}
