//! Narrow interfaces to the host environment.
//!
//! The pipeline never walks a project model, a marker store or a settings
//! database itself. It goes through these traits, so an IDE, a CLI or a test
//! can plug in whatever backs them.

use super::error::{ErrorExt, Result};
use super::problem::{Problem, ProblemKind, Severity};
use super::project::Project;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Resolves declared dependencies to project snapshots.
pub trait ProjectModel: Send + Sync {
    /// Direct dependency projects of `project`, in declaration order.
    fn list_dependencies(&self, project: &Project) -> Result<Vec<Project>>;
}

/// Problem marker store.
pub trait ProblemMarkers: Send + Sync {
    /// `true` if `resource` or anything below it carries an error.
    fn has_critical_problem(&self, resource: &Path) -> bool;
    /// `true` if `resource` carries any marker of `kind`.
    fn has_problems(&self, resource: &Path, kind: ProblemKind) -> bool;
    fn mark_problem(&self, resource: &Path, kind: ProblemKind, problem: &Problem);
    fn clear_problems(&self, resource: &Path, kind: ProblemKind);
}

/// Persisted per-project "needs external compile" flag.
pub trait BuildStateStore: Send + Sync {
    fn read_flag(&self, project: &str) -> bool;
    fn write_flag(&self, project: &str, value: bool) -> Result<()>;
}

/// Project model over a fixed set of snapshots, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct StaticProjectModel {
    projects: HashMap<String, Project>,
}

impl StaticProjectModel {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: projects
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }
}

impl ProjectModel for StaticProjectModel {
    fn list_dependencies(&self, project: &Project) -> Result<Vec<Project>> {
        project
            .dependency_names()
            .iter()
            .map(|name| {
                self.projects.get(name).cloned().ok_or_else(|| {
                    super::Error::UnknownDependency {
                        project: project.name().to_string(),
                        dependency: name.clone(),
                    }
                })
            })
            .collect()
    }
}

/// Marker store kept in memory for the duration of a process.
#[derive(Debug, Default)]
pub struct InMemoryMarkers {
    markers: Mutex<Vec<(PathBuf, ProblemKind, Problem)>>,
}

impl InMemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// All problems filed on or below `resource`.
    pub fn problems_under(&self, resource: &Path) -> Vec<Problem> {
        self.lock()
            .iter()
            .filter(|(path, _, _)| path.starts_with(resource))
            .map(|(_, _, problem)| problem.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(PathBuf, ProblemKind, Problem)>> {
        // A poisoned store still holds consistent entries (pushes are atomic).
        self.markers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProblemMarkers for InMemoryMarkers {
    fn has_critical_problem(&self, resource: &Path) -> bool {
        self.lock().iter().any(|(path, _, problem)| {
            path.starts_with(resource) && problem.severity == Severity::Error
        })
    }

    fn has_problems(&self, resource: &Path, kind: ProblemKind) -> bool {
        self.lock()
            .iter()
            .any(|(path, k, _)| path == resource && *k == kind)
    }

    fn mark_problem(&self, resource: &Path, kind: ProblemKind, problem: &Problem) {
        log::debug!("marking {} on {}: {}", problem.severity, resource.display(), problem);
        self.lock()
            .push((resource.to_path_buf(), kind, problem.clone()));
    }

    fn clear_problems(&self, resource: &Path, kind: ProblemKind) {
        self.lock()
            .retain(|(path, k, _)| !(path.starts_with(resource) && *k == kind));
    }
}

/// Marker store persisted as a JSON array next to the build state, so a
/// failure recorded by one run still gates and retries in the next.
///
/// Every change rewrites the file while the store is locked. A write failure
/// is logged and the in-memory markers stay authoritative for the process.
#[derive(Debug)]
pub struct JsonProblemMarkers {
    path: PathBuf,
    markers: InMemoryMarkers,
}

impl JsonProblemMarkers {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).fs_context("reading problem markers", &path),
        };
        Ok(Self {
            path,
            markers: InMemoryMarkers {
                markers: Mutex::new(entries),
            },
        })
    }

    /// Marker file belonging to the build state file `state_file`.
    pub fn beside(state_file: &Path) -> PathBuf {
        state_file.with_extension("markers.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn problems_under(&self, resource: &Path) -> Vec<Problem> {
        self.markers.problems_under(resource)
    }

    fn save(&self) {
        let entries = self.markers.lock();
        let result = (|| -> Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .fs_context("creating problem marker directory", parent)?;
            }
            let json = serde_json::to_string_pretty(&*entries)?;
            std::fs::write(&self.path, json).fs_context("writing problem markers", &self.path)
        })();
        if let Err(e) = result {
            log::warn!("problem markers not persisted: {}", e);
        }
    }
}

impl ProblemMarkers for JsonProblemMarkers {
    fn has_critical_problem(&self, resource: &Path) -> bool {
        self.markers.has_critical_problem(resource)
    }

    fn has_problems(&self, resource: &Path, kind: ProblemKind) -> bool {
        self.markers.has_problems(resource, kind)
    }

    fn mark_problem(&self, resource: &Path, kind: ProblemKind, problem: &Problem) {
        self.markers.mark_problem(resource, kind, problem);
        self.save();
    }

    fn clear_problems(&self, resource: &Path, kind: ProblemKind) {
        self.markers.clear_problems(resource, kind);
        self.save();
    }
}

/// Build state flags persisted as a JSON object (`{"project": true}`).
///
/// All reads and writes go through one coarse lock, so marks coming from
/// different projects never interleave a read-modify-write.
#[derive(Debug)]
pub struct JsonBuildStateStore {
    path: PathBuf,
    flags: Mutex<BTreeMap<String, bool>>,
}

impl JsonBuildStateStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let flags = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).fs_context("reading build state", &path),
        };
        Ok(Self {
            path,
            flags: Mutex::new(flags),
        })
    }

    /// Default location below the user's cache directory.
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("codship")
            .join("build-state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BuildStateStore for JsonBuildStateStore {
    fn read_flag(&self, project: &str) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.get(project).copied().unwrap_or(false)
    }

    fn write_flag(&self, project: &str, value: bool) -> Result<()> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        if flags.get(project).copied().unwrap_or(false) == value {
            return Ok(());
        }
        if value {
            flags.insert(project.to_string(), true);
        } else {
            flags.remove(project);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).fs_context("creating build state directory", parent)?;
        }
        let json = serde_json::to_string_pretty(&*flags)?;
        std::fs::write(&self.path, json).fs_context("writing build state", &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("flags.json");

        let store = JsonBuildStateStore::open(&path).unwrap();
        assert!(!store.read_flag("app"));
        store.write_flag("app", true).unwrap();
        store.write_flag("lib", true).unwrap();
        store.write_flag("lib", false).unwrap();

        let reopened = JsonBuildStateStore::open(&path).unwrap();
        assert!(reopened.read_flag("app"));
        assert!(!reopened.read_flag("lib"));
    }

    #[test]
    fn problem_markers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = JsonProblemMarkers::beside(&dir.path().join("build-state.json"));
        assert_eq!(path, dir.path().join("build-state.markers.json"));
        let root = Path::new("/work/core");

        let markers = JsonProblemMarkers::open(&path).unwrap();
        markers.mark_problem(root, ProblemKind::Packaging, &Problem::error("copy failed"));
        markers.mark_problem(
            &root.join("src/A.java"),
            ProblemKind::Compiler,
            &Problem::new(Severity::Warning, "deprecated"),
        );

        let reopened = JsonProblemMarkers::open(&path).unwrap();
        assert!(reopened.has_critical_problem(root));
        assert!(reopened.has_problems(root, ProblemKind::Packaging));
        assert_eq!(reopened.problems_under(root).len(), 2);

        reopened.clear_problems(root, ProblemKind::Packaging);
        let cleared = JsonProblemMarkers::open(&path).unwrap();
        assert!(!cleared.has_critical_problem(root));
        assert_eq!(cleared.problems_under(root).len(), 1);
    }

    #[test]
    fn critical_problems_are_found_below_resource() {
        let markers = InMemoryMarkers::new();
        let root = Path::new("/work/app");
        markers.mark_problem(
            &root.join("src/Main.java"),
            ProblemKind::Compiler,
            &Problem::error("cannot find symbol"),
        );
        markers.mark_problem(root, ProblemKind::Packaging, &Problem::new(Severity::Warning, "w"));

        assert!(markers.has_critical_problem(root));
        assert!(!markers.has_critical_problem(Path::new("/work/lib")));
        assert!(markers.has_problems(root, ProblemKind::Packaging));

        markers.clear_problems(root, ProblemKind::Compiler);
        assert!(!markers.has_critical_problem(root));
        assert!(markers.has_problems(root, ProblemKind::Packaging));
    }
}
