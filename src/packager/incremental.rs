//! Per-project repackaging decisions.
//!
//! Staleness is judged from filesystem modification times. Timestamps are
//! advisory: concurrent writers can race them, and equal timestamps count as
//! "not stale" so coarse clock resolution never forces a rebuild loop.

use super::artifact::ArtifactKind;
use super::collaborators::{BuildStateStore, ProblemMarkers};
use super::error::Result;
use super::problem::ProblemKind;
use super::project::Project;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Why a project has to be repackaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// A packaging problem from an earlier attempt is still present
    PreviousFailure,
    /// The incremental builder flagged the project
    ExternalCompileRequested,
    /// The debug-symbol file does not exist
    MissingArtifact,
    /// Descriptor, custom descriptor or build-script override changed
    DescriptorChanged(PathBuf),
    /// A file below an output folder changed
    OutputChanged(PathBuf),
    /// A dependency was rebuilt after this project
    DependencyChanged(String),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::PreviousFailure => f.write_str("previous packaging failed"),
            RebuildReason::ExternalCompileRequested => f.write_str("compile requested"),
            RebuildReason::MissingArtifact => f.write_str("compiled artifact missing"),
            RebuildReason::DescriptorChanged(p) => write!(f, "{} changed", p.display()),
            RebuildReason::OutputChanged(p) => write!(f, "{} changed", p.display()),
            RebuildReason::DependencyChanged(d) => write!(f, "dependency `{d}` changed"),
        }
    }
}

/// Outcome of [`IncrementalBuildDecider::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDecision {
    /// Compile and package
    Package(RebuildReason),
    /// Nothing to compile, but the requested descriptor is missing
    ManifestOnly,
    /// Nothing to do
    UpToDate,
    /// A dependency carries a critical problem
    DependencyFailed(String),
}

impl BuildDecision {
    pub fn needs_packaging(&self) -> bool {
        matches!(self, BuildDecision::Package(_))
    }
}

/// Decides whether a project needs repackaging.
pub struct IncrementalBuildDecider<'a> {
    markers: &'a dyn ProblemMarkers,
    state: &'a dyn BuildStateStore,
}

impl<'a> IncrementalBuildDecider<'a> {
    pub fn new(markers: &'a dyn ProblemMarkers, state: &'a dyn BuildStateStore) -> Self {
        Self { markers, state }
    }

    /// Applies the rebuild rules in order; the first one that fires wins.
    pub fn decide(&self, project: &Project, dependencies: &[Project]) -> Result<BuildDecision> {
        let root = project.root();

        if !self.markers.has_critical_problem(root) {
            if let Some(failed) = dependencies
                .iter()
                .find(|d| self.markers.has_critical_problem(d.root()))
            {
                log::info!(
                    "skipping {}: dependency {} has errors",
                    project.name(),
                    failed.name()
                );
                return Ok(BuildDecision::DependencyFailed(failed.name().to_string()));
            }
        }

        if self.markers.has_problems(root, ProblemKind::Packaging) {
            return Ok(BuildDecision::Package(RebuildReason::PreviousFailure));
        }

        if self.state.read_flag(project.name()) {
            return Ok(BuildDecision::Package(
                RebuildReason::ExternalCompileRequested,
            ));
        }

        let artifact = project.compiled_artifact();
        let Some(built) = modified(&artifact) else {
            return Ok(BuildDecision::Package(RebuildReason::MissingArtifact));
        };
        log::debug!(
            "{}: compiled artifact built {}",
            project.name(),
            format_time(built)
        );

        let descriptors = std::iter::once(project.descriptor_file())
            .chain(project.custom_descriptor())
            .chain(project.custom_build_script());
        for descriptor in descriptors {
            if is_newer(&descriptor, built) {
                return Ok(BuildDecision::Package(RebuildReason::DescriptorChanged(
                    descriptor,
                )));
            }
        }

        for folder in project.output_folders() {
            if let Some(changed) = newest_change(&folder, built)? {
                return Ok(BuildDecision::Package(RebuildReason::OutputChanged(changed)));
            }
        }

        for dependency in dependencies {
            if is_newer(&dependency.compiled_artifact(), built) {
                return Ok(BuildDecision::Package(RebuildReason::DependencyChanged(
                    dependency.name().to_string(),
                )));
            }
        }

        if project.output().generate_manifest
            && !project.artifact_path(ArtifactKind::Jad).exists()
        {
            return Ok(BuildDecision::ManifestOnly);
        }

        Ok(BuildDecision::UpToDate)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Strictly newer; ties are not stale.
fn is_newer(path: &Path, than: SystemTime) -> bool {
    match modified(path) {
        Some(time) if time > than => {
            log::debug!(
                "{} modified {} after artifact {}",
                path.display(),
                format_time(time),
                format_time(than)
            );
            true
        }
        _ => false,
    }
}

/// First file below `folder` newer than `than`.
fn newest_change(folder: &Path, than: SystemTime) -> Result<Option<PathBuf>> {
    if !folder.is_dir() {
        return Ok(None);
    }
    for entry in walkdir::WalkDir::new(folder).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() && is_newer(entry.path(), than) {
            return Ok(Some(entry.path().to_path_buf()));
        }
    }
    Ok(None)
}

fn format_time(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{
        InMemoryMarkers, JsonBuildStateStore, Problem, ProjectBuilder, Toolchain,
    };
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        app: Project,
        lib: Project,
        markers: InMemoryMarkers,
        state: JsonBuildStateStore,
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    fn touch(path: &Path, time: SystemTime) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
        set_mtime(path, time);
    }

    fn base() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Toolchain::new(dir.path().join("jde"), "5.0.0");
        let lib = ProjectBuilder::new("lib")
            .root(dir.path().join("lib"))
            .toolchain(toolchain.clone())
            .build()
            .unwrap();
        let app = ProjectBuilder::new("app")
            .root(dir.path().join("app"))
            .toolchain(toolchain)
            .dependencies(vec!["lib".into()])
            .build()
            .unwrap();
        let state = JsonBuildStateStore::open(dir.path().join("state.json")).unwrap();
        Fixture {
            _dir: dir,
            app,
            lib,
            markers: InMemoryMarkers::new(),
            state,
        }
    }

    /// Everything built after every input.
    fn up_to_date(f: &Fixture) {
        touch(&f.app.descriptor_file(), base());
        touch(&f.app.root().join("bin/Main.class"), base());
        touch(&f.lib.compiled_artifact(), base() + Duration::from_secs(5));
        touch(&f.app.compiled_artifact(), base() + Duration::from_secs(10));
    }

    fn decide(f: &Fixture) -> BuildDecision {
        IncrementalBuildDecider::new(&f.markers, &f.state)
            .decide(&f.app, std::slice::from_ref(&f.lib))
            .unwrap()
    }

    #[test]
    fn fresh_build_needs_packaging() {
        let f = fixture();
        assert_eq!(
            decide(&f),
            BuildDecision::Package(RebuildReason::MissingArtifact)
        );
    }

    #[test]
    fn up_to_date_project_is_skipped_twice() {
        let f = fixture();
        up_to_date(&f);
        assert_eq!(decide(&f), BuildDecision::UpToDate);
        assert_eq!(decide(&f), BuildDecision::UpToDate);
    }

    #[test]
    fn stale_dependency_forces_packaging() {
        let f = fixture();
        up_to_date(&f);
        set_mtime(&f.lib.compiled_artifact(), base() + Duration::from_secs(20));
        assert_eq!(
            decide(&f),
            BuildDecision::Package(RebuildReason::DependencyChanged("lib".into()))
        );
    }

    #[test]
    fn equal_timestamps_are_not_stale() {
        let f = fixture();
        up_to_date(&f);
        set_mtime(&f.app.descriptor_file(), base() + Duration::from_secs(10));
        assert_eq!(decide(&f), BuildDecision::UpToDate);
    }

    #[test]
    fn changed_descriptor_and_outputs_are_detected() {
        let f = fixture();
        up_to_date(&f);
        let class = f.app.root().join("bin/com/acme/Util.class");
        touch(&class, base() + Duration::from_secs(11));
        assert_eq!(
            decide(&f),
            BuildDecision::Package(RebuildReason::OutputChanged(class))
        );

        set_mtime(&f.app.descriptor_file(), base() + Duration::from_secs(12));
        assert!(matches!(
            decide(&f),
            BuildDecision::Package(RebuildReason::DescriptorChanged(_))
        ));
    }

    #[test]
    fn flags_and_previous_failures_force_packaging() {
        let f = fixture();
        up_to_date(&f);
        f.state.write_flag("app", true).unwrap();
        assert_eq!(
            decide(&f),
            BuildDecision::Package(RebuildReason::ExternalCompileRequested)
        );

        f.markers.mark_problem(
            f.app.root(),
            ProblemKind::Packaging,
            &Problem::error("packaging failed"),
        );
        assert_eq!(
            decide(&f),
            BuildDecision::Package(RebuildReason::PreviousFailure)
        );
    }

    #[test]
    fn broken_dependency_gates_packaging() {
        let f = fixture();
        f.markers.mark_problem(
            &f.lib.root().join("src/A.java"),
            ProblemKind::Compiler,
            &Problem::error("syntax error"),
        );
        assert_eq!(decide(&f), BuildDecision::DependencyFailed("lib".into()));
    }

    #[test]
    fn missing_descriptor_triggers_manifest_only() {
        let mut f = fixture();
        f.app = ProjectBuilder::new("app")
            .root(f.app.root())
            .toolchain(f.app.toolchain().clone())
            .dependencies(vec!["lib".into()])
            .generate_manifest(true)
            .build()
            .unwrap();
        up_to_date(&f);
        assert_eq!(decide(&f), BuildDecision::ManifestOnly);

        touch(&f.app.artifact_path(ArtifactKind::Jad), base());
        assert_eq!(decide(&f), BuildDecision::UpToDate);
    }
}
