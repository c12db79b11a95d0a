//! The packaging job.
//!
//! One run takes a project set through ordering, the incremental decision,
//! compilation, fan-out and signing, strictly one project at a time in
//! dependency order. A failing project never stops an independent sibling;
//! its dependents are gated by the decider instead.

use super::artifact::{self, ArtifactKind};
use super::collaborators::{BuildStateStore, ProblemMarkers, ProjectModel};
use super::compiler::{ArtifactCompiler, CompileResult};
use super::device::Deliverable;
use super::error::Result;
use super::fanout::DeploymentFanout;
use super::incremental::{BuildDecision, IncrementalBuildDecider};
use super::manifest;
use super::order;
use super::problem::{Problem, ProblemKind};
use super::project::Project;
use super::signing::{self, SigningConfig, SigningOutcome};
use super::status::Status;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Caller-owned count of incremental builds in flight.
///
/// Packaging waits for it to drop to zero before touching any file the
/// incremental builder may still be writing.
#[derive(Debug, Clone)]
pub struct BuildActivity {
    active: Arc<watch::Sender<usize>>,
}

/// Marks one incremental build as running until dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    active: Arc<watch::Sender<usize>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for BuildActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildActivity {
    pub fn new() -> Self {
        Self {
            active: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn begin(&self) -> ActivityGuard {
        self.active.send_modify(|n| *n += 1);
        ActivityGuard {
            active: self.active.clone(),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once nothing is running. `false` if cancelled first.
    pub async fn wait_idle(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.active.subscribe();
        tokio::select! {
            idle = async { rx.wait_for(|n| *n == 0).await.is_ok() } => idle,
            _ = cancel.cancelled() => false,
        }
    }
}

/// What happened to one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Compiled and published
    Packaged,
    UpToDate,
    /// Only the descriptor was regenerated
    ManifestOnly,
    /// Gated by a broken dependency
    SkippedDependencyFailed(String),
    /// The compiler ran and reported this many errors
    CompileErrors(usize),
    Failed(String),
    Cancelled,
}

impl ProjectOutcome {
    /// Deliverables of the project are usable by later stages.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            ProjectOutcome::Packaged | ProjectOutcome::UpToDate | ProjectOutcome::ManifestOnly
        )
    }

    pub fn status(&self) -> Status {
        match self {
            ProjectOutcome::Packaged | ProjectOutcome::UpToDate | ProjectOutcome::ManifestOnly => {
                Status::Ok
            }
            // diagnostics are reported through markers, not as a failure
            ProjectOutcome::CompileErrors(_) => Status::Ok,
            ProjectOutcome::SkippedDependencyFailed(dependency) => {
                Status::failed(format!("dependency `{dependency}` has errors"))
            }
            ProjectOutcome::Failed(reason) => Status::failed(reason),
            ProjectOutcome::Cancelled => Status::Cancelled,
        }
    }
}

impl fmt::Display for ProjectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectOutcome::Packaged => f.write_str("packaged"),
            ProjectOutcome::UpToDate => f.write_str("up to date"),
            ProjectOutcome::ManifestOnly => f.write_str("descriptor regenerated"),
            ProjectOutcome::SkippedDependencyFailed(d) => {
                write!(f, "skipped, dependency `{d}` has errors")
            }
            ProjectOutcome::CompileErrors(n) => write!(f, "{n} compile error(s)"),
            ProjectOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            ProjectOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub name: String,
    pub outcome: ProjectOutcome,
}

impl ProjectReport {
    pub fn status(&self) -> Status {
        self.outcome.status()
    }
}

/// Result of one packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingReport {
    /// In processing order; projects excluded before ordering come first
    pub projects: Vec<ProjectReport>,
    pub signing: SigningOutcome,
    /// Published files, ready for deployment
    pub deliverables: Vec<Deliverable>,
}

impl PackagingReport {
    pub fn project(&self, name: &str) -> Option<&ProjectReport> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Cancelled wins over failed, failed over ok.
    pub fn status(&self) -> Status {
        let statuses = self
            .projects
            .iter()
            .map(ProjectReport::status)
            .chain(std::iter::once(self.signing.status()));
        let mut overall = Status::Ok;
        for status in statuses {
            match status {
                Status::Cancelled => return Status::Cancelled,
                Status::Failed(_) if overall.is_ok() => overall = status,
                _ => {}
            }
        }
        overall
    }
}

/// Called with the report at the end of every run.
pub type PostBuildHook = Arc<dyn Fn(&PackagingReport) + Send + Sync>;

/// Packaging job over a set of projects.
pub struct PackagingPipeline {
    model: Arc<dyn ProjectModel>,
    markers: Arc<dyn ProblemMarkers>,
    state: Arc<dyn BuildStateStore>,
    signing: SigningConfig,
    activity: Option<BuildActivity>,
    hook: Option<PostBuildHook>,
    fanout: DeploymentFanout,
}

impl PackagingPipeline {
    pub fn new(
        model: Arc<dyn ProjectModel>,
        markers: Arc<dyn ProblemMarkers>,
        state: Arc<dyn BuildStateStore>,
    ) -> Self {
        Self {
            model,
            markers,
            state,
            signing: SigningConfig::default(),
            activity: None,
            hook: None,
            fanout: DeploymentFanout::new(),
        }
    }

    pub fn signing(mut self, config: SigningConfig) -> Self {
        self.signing = config;
        self
    }

    /// Waits for `activity` to go idle before each run.
    pub fn build_activity(mut self, activity: BuildActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn post_build_hook(mut self, hook: PostBuildHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Packages `projects` and everything they need, in dependency order.
    ///
    /// # Arguments
    ///
    /// * `projects` - Requested projects; dependencies outside the set are
    ///   expected to be packaged already
    /// * `cancel` - Stops after the current step; unfinished projects are
    ///   reported as cancelled
    pub async fn run(&self, projects: &[Project], cancel: &CancellationToken) -> PackagingReport {
        let report = self.run_inner(projects, cancel).await;
        for project in &report.projects {
            log::info!("{}: {}", project.name, project.outcome);
        }
        if let Some(hook) = &self.hook {
            hook(&report);
        }
        report
    }

    async fn run_inner(&self, projects: &[Project], cancel: &CancellationToken) -> PackagingReport {
        let mut reports = Vec::new();

        if let Some(activity) = &self.activity {
            if activity.active() > 0 {
                log::info!("waiting for {} running build(s) to finish", activity.active());
            }
            if !activity.wait_idle(cancel).await {
                return cancelled_report(projects.iter().map(|p| p.name().to_string()).collect());
            }
        }

        // projects whose dependencies cannot even be resolved
        let mut resolvable = Vec::new();
        for project in projects {
            match order::dependency_closure(project, self.model.as_ref()) {
                Ok(_) => resolvable.push(project.clone()),
                Err(e) => reports.push(self.fail(project, e.to_string())),
            }
        }

        let ordered = match order::partition_cycles(&resolvable, self.model.as_ref()) {
            Ok((ordered, excluded)) => {
                for (project, error) in excluded {
                    reports.push(self.fail(&project, error.to_string()));
                }
                ordered
            }
            Err(e) => {
                for project in &resolvable {
                    reports.push(self.fail(project, e.to_string()));
                }
                Vec::new()
            }
        };

        let mut compiled = HashSet::new();
        for (position, project) in ordered.iter().enumerate() {
            if cancel.is_cancelled() {
                reports.extend(ordered[position..].iter().map(|p| ProjectReport {
                    name: p.name().to_string(),
                    outcome: ProjectOutcome::Cancelled,
                }));
                break;
            }

            let outcome = match self.package(project, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("{}: {}", project.name(), e);
                    self.mark_failure(project, &e.to_string());
                    ProjectOutcome::Failed(e.to_string())
                }
            };
            if outcome == ProjectOutcome::Packaged {
                compiled.insert(project.name().to_string());
            }
            reports.push(ProjectReport {
                name: project.name().to_string(),
                outcome,
            });
        }

        let available: Vec<Project> = ordered
            .iter()
            .filter(|p| {
                reports
                    .iter()
                    .any(|r| r.name == p.name() && r.outcome.is_available())
            })
            .cloned()
            .collect();

        let signing = if cancel.is_cancelled() {
            SigningOutcome::Cancelled
        } else {
            match signing::plan(self.signing.mode, &available, &compiled, self.model.as_ref()) {
                Ok(plan) => {
                    signing::SigningCoordinator::new(&self.signing, self.model.as_ref())
                        .sign(&plan, cancel)
                        .await
                }
                Err(e) => SigningOutcome::Failed(e.to_string()),
            }
        };
        if let SigningOutcome::Failed(reason) = &signing {
            log::error!("signing failed: {}", reason);
        }

        let deliverables = match deliverables(&available, self.model.as_ref()) {
            Ok(deliverables) => deliverables,
            Err(e) => {
                log::error!("collecting deliverables failed: {}", e);
                Vec::new()
            }
        };

        PackagingReport {
            projects: reports,
            signing,
            deliverables,
        }
    }

    /// Runs the decider and whatever it asks for on one project.
    async fn package(&self, project: &Project, cancel: &CancellationToken) -> Result<ProjectOutcome> {
        let dependencies = self.model.list_dependencies(project)?;
        let decider = IncrementalBuildDecider::new(self.markers.as_ref(), self.state.as_ref());

        match decider.decide(project, &dependencies)? {
            BuildDecision::DependencyFailed(dependency) => {
                Ok(ProjectOutcome::SkippedDependencyFailed(dependency))
            }
            BuildDecision::UpToDate => Ok(ProjectOutcome::UpToDate),
            BuildDecision::ManifestOnly => {
                let project = project.clone();
                let fanout = self.fanout;
                tokio::task::spawn_blocking(move || -> Result<()> {
                    write_descriptor(&project)?;
                    fanout.publish_web(&project)?;
                    Ok(())
                })
                .await??;
                Ok(ProjectOutcome::ManifestOnly)
            }
            BuildDecision::Package(reason) => {
                log::info!("packaging {}: {}", project.name(), reason);
                self.markers
                    .clear_problems(project.root(), ProblemKind::Packaging);

                let compiler = ArtifactCompiler::new(self.markers.as_ref());
                let outcome = match compiler.compile(project, &dependencies, cancel).await? {
                    CompileResult::Cancelled => return Ok(ProjectOutcome::Cancelled),
                    CompileResult::Completed(outcome) => outcome,
                };
                if !outcome.success {
                    let errors = outcome.error_count();
                    self.mark_failure(
                        project,
                        &format!(
                            "compilation failed with {} error(s), exit code {:?}",
                            errors, outcome.exit_code
                        ),
                    );
                    return Ok(ProjectOutcome::CompileErrors(errors));
                }

                let closure = order::dependency_closure(project, self.model.as_ref())?;
                let owned = project.clone();
                let fanout = self.fanout;
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let project = owned;
                    if project.output().generate_manifest
                        && !project.artifact_path(ArtifactKind::Jad).exists()
                    {
                        write_descriptor(&project)?;
                    }
                    if !closure.is_empty() {
                        fanout.propagate_dependencies(&project, &closure)?;
                    }
                    fanout.publish_web(&project)?;
                    Ok(())
                })
                .await??;
                self.state.write_flag(project.name(), false)?;
                Ok(ProjectOutcome::Packaged)
            }
        }
    }

    fn fail(&self, project: &Project, reason: String) -> ProjectReport {
        log::error!("{}: {}", project.name(), reason);
        self.mark_failure(project, &reason);
        ProjectReport {
            name: project.name().to_string(),
            outcome: ProjectOutcome::Failed(reason),
        }
    }

    fn mark_failure(&self, project: &Project, reason: &str) {
        self.markers.mark_problem(
            project.root(),
            ProblemKind::Packaging,
            &Problem::error(reason),
        );
    }
}

fn cancelled_report(names: Vec<String>) -> PackagingReport {
    PackagingReport {
        projects: names
            .into_iter()
            .map(|name| ProjectReport {
                name,
                outcome: ProjectOutcome::Cancelled,
            })
            .collect(),
        signing: SigningOutcome::Cancelled,
        deliverables: Vec::new(),
    }
}

/// Generates `<base>.jad` from the binary-code siblings already on disk.
fn write_descriptor(project: &Project) -> Result<()> {
    let descriptor = manifest::generate_descriptor(project)?;
    descriptor.write(&project.artifact_path(ArtifactKind::Jad))?;
    log::info!("{}: generated {}.jad", project.name(), project.base_name());
    Ok(())
}

/// Binary-code siblings and the top-level descriptor of every available
/// project, flagging projects that are only present as someone's dependency.
fn deliverables(available: &[Project], model: &dyn ProjectModel) -> Result<Vec<Deliverable>> {
    let mut closures: HashMap<&str, Vec<Project>> = HashMap::new();
    for project in available {
        closures.insert(project.name(), order::dependency_closure(project, model)?);
    }
    let is_dependency = |name: &str| {
        closures
            .values()
            .any(|closure| closure.iter().any(|d| d.name() == name))
    };

    let mut deliverables = Vec::new();
    for project in available {
        let dependency_only = is_dependency(project.name());
        let dir = project.standard_dir();
        for cod in artifact::discover_siblings(&dir, project.base_name(), ArtifactKind::Cod) {
            deliverables.push(Deliverable {
                project: project.name().to_string(),
                path: cod,
                dependency_only,
            });
        }

        let full = dir.join(manifest::full_descriptor_name(project.base_name()));
        let jad = if full.is_file() {
            full
        } else {
            project.artifact_path(ArtifactKind::Jad)
        };
        if jad.is_file() {
            deliverables.push(Deliverable {
                project: project.name().to_string(),
                path: jad,
                dependency_only,
            });
        }
    }
    Ok(deliverables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{InMemoryMarkers, JsonBuildStateStore, ProjectBuilder, StaticProjectModel, Toolchain};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    fn project(root: &Path, name: &str, deps: &[&str]) -> Project {
        ProjectBuilder::new(name)
            .root(root.join(name))
            .toolchain(Toolchain::new(root.join("jde"), "5.0.0"))
            .dependencies(deps.iter().map(|d| d.to_string()).collect())
            .build()
            .unwrap()
    }

    fn pipeline(dir: &Path, projects: &[Project]) -> PackagingPipeline {
        PackagingPipeline::new(
            Arc::new(StaticProjectModel::new(projects.to_vec())),
            Arc::new(InMemoryMarkers::new()),
            Arc::new(JsonBuildStateStore::open(dir.join("state.json")).unwrap()),
        )
    }

    #[tokio::test]
    async fn build_activity_gates_the_run() {
        let activity = BuildActivity::new();
        let guard = activity.begin();
        assert_eq!(activity.active(), 1);

        let waiter = activity.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle(&CancellationToken::new()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        drop(guard);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_wait_reports_every_project_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let all = vec![project(dir.path(), "a", &[])];
        let activity = BuildActivity::new();
        let _busy = activity.begin();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pipeline(dir.path(), &all)
            .build_activity(activity)
            .run(&all, &cancel)
            .await;
        assert_eq!(report.status(), Status::Cancelled);
        assert_eq!(report.projects[0].outcome, ProjectOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cycles_fail_only_their_members_and_hook_sees_report() {
        let dir = tempfile::tempdir().unwrap();
        let all = vec![
            project(dir.path(), "a", &["b"]),
            project(dir.path(), "b", &["a"]),
            project(dir.path(), "ghost-user", &["ghost"]),
        ];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let report = pipeline(dir.path(), &all)
            .post_build_hook(Arc::new(move |report: &PackagingReport| {
                sink.lock()
                    .unwrap()
                    .extend(report.projects.iter().map(|p| p.name.clone()));
            }))
            .run(&all, &CancellationToken::new())
            .await;

        assert!(matches!(
            &report.project("a").unwrap().outcome,
            ProjectOutcome::Failed(reason) if reason.contains("cycle")
        ));
        assert!(matches!(
            &report.project("ghost-user").unwrap().outcome,
            ProjectOutcome::Failed(reason) if reason.contains("unknown project `ghost`")
        ));
        assert!(report.status().is_failed());
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_toolchain_fails_project_not_batch() {
        let dir = tempfile::tempdir().unwrap();
        let all = vec![project(dir.path(), "app", &[])];
        let report = pipeline(dir.path(), &all).run(&all, &CancellationToken::new()).await;
        assert!(matches!(
            &report.project("app").unwrap().outcome,
            ProjectOutcome::Failed(reason) if reason.contains("toolchain not found")
        ));
        assert_eq!(report.signing, SigningOutcome::Skipped);
    }

    #[test]
    fn report_status_prefers_cancelled() {
        let report = PackagingReport {
            projects: vec![
                ProjectReport { name: "a".into(), outcome: ProjectOutcome::Failed("x".into()) },
                ProjectReport { name: "b".into(), outcome: ProjectOutcome::Cancelled },
                ProjectReport { name: "c".into(), outcome: ProjectOutcome::CompileErrors(2) },
            ],
            signing: SigningOutcome::Skipped,
            deliverables: Vec::new(),
        };
        assert_eq!(report.status(), Status::Cancelled);
        assert_eq!(report.projects[2].status(), Status::Ok);
    }
}
