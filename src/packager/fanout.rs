//! Deliverable fan-out.
//!
//! After a project is packaged its artifacts have to show up in three kinds of
//! places: the standard folders of the projects depending on it, the merged
//! descriptor of each of those, and the over-the-air `Web/` mirror.
//!
//! All copies preserve the source's modification time so that the staleness
//! checks in [`incremental`](super::incremental) converge.

use super::artifact::{self, ArtifactKind};
use super::error::{ErrorExt, Result};
use super::manifest::{self, Descriptor};
use super::project::Project;
use super::utils::fs;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What a fan-out pass touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// Files copied or unpacked
    pub copied: usize,
    /// Merged descriptor written, if any
    pub full_descriptor: Option<PathBuf>,
}

/// Replicates packaged artifacts into every folder that must contain them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentFanout;

impl DeploymentFanout {
    pub fn new() -> Self {
        Self
    }

    /// Copies the artifacts of every dependency into `project`'s standard
    /// folder and merges their descriptor entries into `<base>_full.jad`.
    ///
    /// Dependencies built for another toolchain version land in the sibling
    /// version folder and their descriptor URLs are rewritten to
    /// `../<version>/<url>`.
    ///
    /// # Arguments
    ///
    /// * `project` - The dependent project
    /// * `dependencies` - Its transitive dependencies, already packaged
    pub fn propagate_dependencies(
        &self,
        project: &Project,
        dependencies: &[Project],
    ) -> Result<FanoutSummary> {
        let own_dir = project.standard_dir();
        let own_version = project.toolchain().output_folder_name();
        let mut summary = FanoutSummary::default();
        let mut merged = read_descriptor(&project.artifact_path(ArtifactKind::Jad))?;

        for dependency in dependencies {
            let version = dependency.toolchain().output_folder_name();
            let dest = if version == own_version {
                own_dir.clone()
            } else {
                project.standard_root().join(version)
            };
            let sources = deliverables(&dependency.standard_dir(), dependency.base_name())?;
            if sources.is_empty() {
                log::warn!(
                    "{}: dependency {} has no deliverables in {}",
                    project.name(),
                    dependency.name(),
                    dependency.standard_dir().display()
                );
                continue;
            }

            summary.copied += replace_if_changed(&sources, &dest, dependency.base_name(), project)?;

            let Some(descriptor) = merged.as_mut() else {
                continue;
            };
            let dependency_jad = dependency.artifact_path(ArtifactKind::Jad);
            let Some(other) = read_descriptor(&dependency_jad)? else {
                log::debug!("{} has no descriptor to merge", dependency.name());
                continue;
            };
            if version == own_version {
                descriptor.add_cod_entries(&other);
            } else {
                descriptor.add_relocated_cod_entries(&other, version);
            }
        }

        if let Some(descriptor) = merged {
            let path = own_dir.join(manifest::full_descriptor_name(project.base_name()));
            descriptor.write(&path)?;
            summary.full_descriptor = Some(path);
        }
        Ok(summary)
    }

    /// Mirrors `Standard/` into `Web/`, unpacking binary-code containers into
    /// their individual siblings.
    pub fn publish_web(&self, project: &Project) -> Result<FanoutSummary> {
        let source_root = project.standard_root();
        let web_root = project.web_root();
        let mut summary = FanoutSummary::default();
        if !source_root.is_dir() {
            return Ok(summary);
        }

        for entry in walkdir::WalkDir::new(&source_root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&source_root).unwrap_or(entry.path());
            let dest = web_root.join(relative);

            let copied = if ArtifactKind::of_path(entry.path()) == Some(ArtifactKind::Cod) {
                publish_cod(entry.path(), &dest)?
            } else {
                usize::from(fs::copy_if_changed(entry.path(), &dest)?)
            };
            summary.copied += copied;
        }
        log::debug!(
            "{}: published {} file(s) to {}",
            project.name(),
            summary.copied,
            web_root.display()
        );
        Ok(summary)
    }
}

/// Artifacts of `base_name` in `dir` worth shipping to a dependent: no build
/// script and no merged descriptor.
fn deliverables(dir: &Path, base_name: &str) -> Result<Vec<PathBuf>> {
    let full = manifest::full_descriptor_name(base_name);
    Ok(fs::family_files(dir, base_name, None)?
        .into_iter()
        .filter(|p| ArtifactKind::of_path(p) != Some(ArtifactKind::Rapc))
        .filter(|p| p.file_name().is_none_or(|n| n != full.as_str()))
        .collect())
}

/// Replaces the family of `base_name` in `dest` with `sources` unless every
/// file already matches by name and timestamp.
///
/// Files of `owner` are never erased, even if its base name looks like a
/// sibling of `base_name` (`lib` vs `lib-2`).
fn replace_if_changed(sources: &[PathBuf], dest: &Path, base_name: &str, owner: &Project) -> Result<usize> {
    let current: Vec<PathBuf> = fs::family_files(dest, base_name, None)?
        .into_iter()
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            owner.base_name() == base_name || !artifact::belongs_to(name, owner.base_name())
        })
        .collect();

    let names = |paths: &[PathBuf]| -> BTreeSet<PathBuf> {
        paths.iter().filter_map(|p| p.file_name().map(PathBuf::from)).collect()
    };
    let same_set = names(&current) == names(sources);
    let unchanged = same_set
        && sources.iter().all(|source| {
            source
                .file_name()
                .is_some_and(|n| fs::modified(&dest.join(n)) == fs::modified(source))
        });
    if unchanged {
        return Ok(0);
    }

    // erase, then copy: an interruption leaves nothing rather than a mix
    for stale in &current {
        fs::remove_file(stale)?;
    }
    fs::create_dir_all(dest)?;
    fs::copy_into(sources, dest)
}

fn read_descriptor(path: &Path) -> Result<Option<Descriptor>> {
    if path.is_file() {
        Descriptor::read(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Publishes one `.cod`. A container archive is unpacked into its siblings,
/// stamped with the container's time; anything else is copied as is.
fn publish_cod(source: &Path, dest: &Path) -> Result<usize> {
    let Some(dest_dir) = dest.parent() else {
        return Ok(0);
    };
    let file = std::fs::File::open(source).fs_context("opening artifact", source)?;
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(archive) if !archive.is_empty() => archive,
        _ => return Ok(usize::from(fs::copy_if_changed(source, dest)?)),
    };

    let container_time = fs::modified(source).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if let Some(name) = entry.enclosed_name().and_then(|p| p.file_name().map(PathBuf::from)) {
            names.push(name);
        }
    }

    let fresh = names
        .iter()
        .all(|name| fs::modified(&dest_dir.join(name)) == Some(container_time));
    if fresh {
        return Ok(0);
    }

    let base_name = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::erase_family(dest_dir, &base_name, Some(ArtifactKind::Cod))?;
    fs::create_dir_all(dest_dir)?;

    let mut unpacked = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().and_then(|p| p.file_name().map(PathBuf::from))
        else {
            log::warn!("skipping unsafe entry {} in {}", entry.name(), source.display());
            continue;
        };
        let target = dest_dir.join(&name);
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .fs_context("unpacking", source)?;
        std::fs::write(&target, content).fs_context("writing sibling", &target)?;
        fs::set_modified(&target, container_time)?;
        unpacked += 1;
    }
    log::debug!("unpacked {} sibling(s) of {}", unpacked, source.display());
    Ok(unpacked)
}
