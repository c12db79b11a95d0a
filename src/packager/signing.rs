//! Code signing.
//!
//! Signing runs once per batch, after every project has been packaged. The
//! [`SigningMode`] decides which projects are signed; projects that do not
//! need a signature themselves but depend on one that does receive the signed
//! files by copy-forward instead.

use super::artifact::{self, ArtifactKind};
use super::collaborators::ProjectModel;
use super::error::{Error, Result};
use super::fanout::DeploymentFanout;
use super::order;
use super::project::Project;
use super::status::Status;
use super::tool_detection;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// When to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningMode {
    /// Always
    Force,
    /// If any project was compiled in this batch
    IfNecessary,
    /// Only projects whose code uses access-controlled APIs
    #[default]
    IfProtectedApiUsed,
    /// Never
    No,
}

impl FromStr for SigningMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "force" => Ok(Self::Force),
            "if-necessary" => Ok(Self::IfNecessary),
            "if-protected-api-used" | "protected" => Ok(Self::IfProtectedApiUsed),
            "no" | "never" => Ok(Self::No),
            other => Err(format!(
                "unknown signing mode `{other}` (expected force, if-necessary, if-protected-api-used or no)"
            )),
        }
    }
}

/// Signing tool settings.
#[derive(Debug, Clone, Default)]
pub struct SigningConfig {
    pub mode: SigningMode,
    /// Overrides the toolchain's `SignatureTool.jar`
    pub tool: Option<PathBuf>,
    /// Private key password, passed with `-p`
    pub password: Option<String>,
}

/// Which projects are signed and which only receive signed files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningPlan {
    pub to_sign: Vec<Project>,
    /// Projects whose dependency needs signing but which do not
    pub copy_forward: Vec<Project>,
}

impl SigningPlan {
    pub fn is_empty(&self) -> bool {
        self.to_sign.is_empty()
    }
}

/// Result of the signing step of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningOutcome {
    /// Nothing needed a signature
    Skipped,
    /// Names of the signed projects
    Signed(Vec<String>),
    Failed(String),
    Cancelled,
}

impl SigningOutcome {
    pub fn status(&self) -> Status {
        match self {
            SigningOutcome::Skipped | SigningOutcome::Signed(_) => Status::Ok,
            SigningOutcome::Failed(reason) => Status::failed(reason.clone()),
            SigningOutcome::Cancelled => Status::Cancelled,
        }
    }
}

/// `true` if the compiler left a `<base>*.csl` next to the project's code,
/// which it does for modules calling access-controlled APIs.
pub fn uses_protected_api(project: &Project) -> bool {
    let dir = project.standard_dir();
    let pattern = format!(
        "{}/{}*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(project.base_name()),
        ArtifactKind::Csl.extension()
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .flatten()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .any(|name| artifact::belongs_to(&name, project.base_name())),
        Err(e) => {
            log::warn!("invalid signature file pattern {}: {}", pattern, e);
            false
        }
    }
}

/// Decides who gets signed.
///
/// # Arguments
///
/// * `mode` - Signing mode
/// * `batch` - Successfully packaged projects, in build order
/// * `compiled` - Names of the projects compiled in this batch
/// * `model` - Dependency lookup
pub fn plan(
    mode: SigningMode,
    batch: &[Project],
    compiled: &HashSet<String>,
    model: &dyn ProjectModel,
) -> Result<SigningPlan> {
    let to_sign: Vec<Project> = match mode {
        SigningMode::No => Vec::new(),
        SigningMode::Force => batch.to_vec(),
        SigningMode::IfNecessary if compiled.is_empty() => Vec::new(),
        SigningMode::IfNecessary => batch.to_vec(),
        SigningMode::IfProtectedApiUsed => batch
            .iter()
            .filter(|p| uses_protected_api(p))
            .cloned()
            .collect(),
    };

    let signed: HashSet<&str> = to_sign.iter().map(Project::name).collect();
    let mut copy_forward = Vec::new();
    if !signed.is_empty() {
        for project in batch {
            if signed.contains(project.name()) {
                continue;
            }
            let closure = order::dependency_closure(project, model)?;
            if closure.iter().any(|d| signed.contains(d.name())) {
                copy_forward.push(project.clone());
            }
        }
    }

    Ok(SigningPlan {
        to_sign,
        copy_forward,
    })
}

/// Runs the signing tool and distributes its output.
pub struct SigningCoordinator<'a> {
    config: &'a SigningConfig,
    fanout: DeploymentFanout,
    model: &'a dyn ProjectModel,
}

impl<'a> SigningCoordinator<'a> {
    pub fn new(config: &'a SigningConfig, model: &'a dyn ProjectModel) -> Self {
        Self {
            config,
            fanout: DeploymentFanout::new(),
            model,
        }
    }

    /// Signs every project of `plan` in one tool call, then copies the signed
    /// files forward to dependents and republishes the web folders.
    ///
    /// A failure here leaves the already published unsigned deliverables of
    /// projects that needed no signature untouched.
    pub async fn sign(&self, plan: &SigningPlan, cancel: &CancellationToken) -> SigningOutcome {
        if plan.is_empty() {
            log::info!("signing skipped: no project needs a signature");
            return SigningOutcome::Skipped;
        }

        match self.run_tool(plan, cancel).await {
            Ok(Status::Ok) => {}
            Ok(Status::Cancelled) => return SigningOutcome::Cancelled,
            Ok(Status::Failed(reason)) => return SigningOutcome::Failed(reason),
            Err(e) => return SigningOutcome::Failed(e.to_string()),
        }

        if let Err(e) = self.distribute(plan).await {
            log::error!("distributing signed files failed: {}", e);
            return SigningOutcome::Failed(e.to_string());
        }

        SigningOutcome::Signed(plan.to_sign.iter().map(|p| p.name().to_string()).collect())
    }

    async fn run_tool(&self, plan: &SigningPlan, cancel: &CancellationToken) -> Result<Status> {
        let java = tool_detection::JAVA
            .clone()
            .ok_or_else(|| Error::MissingToolchain("no java runtime on PATH to run the signing tool".into()))?;
        let tool = match &self.config.tool {
            Some(tool) => tool.clone(),
            None => plan.to_sign[0].toolchain().signing_tool(),
        };
        if !tool.is_file() {
            return Err(Error::MissingToolchain(format!(
                "signing tool {} does not exist",
                tool.display()
            )));
        }

        let cods: Vec<PathBuf> = plan
            .to_sign
            .iter()
            .flat_map(|p| artifact::discover_siblings(&p.standard_dir(), p.base_name(), ArtifactKind::Cod))
            .collect();
        if cods.is_empty() {
            return Err(Error::SigningFailed("no binary-code artifacts to sign".into()));
        }

        let mut command = Command::new(&java);
        command.arg("-jar").arg(&tool).args(["-a", "-c"]);
        if let Some(password) = &self.config.password {
            command.arg("-p").arg(password);
        }
        command
            .args(&cods)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!("signing {} file(s) with {}", cods.len(), tool.display());
        let child = command.spawn().map_err(|error| Error::CommandFailed {
            command: format!("java -jar {}", tool.display()),
            error,
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|error| Error::CommandFailed {
                command: format!("java -jar {}", tool.display()),
                error,
            })?,
            _ = cancel.cancelled() => {
                log::info!("signing cancelled");
                return Ok(Status::Cancelled);
            }
        };

        if output.status.success() {
            Ok(Status::Ok)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            Ok(Status::failed(
                Error::SigningFailed(format!(
                    "signing tool exited with {}: {}",
                    output.status,
                    detail.trim()
                )),
            ))
        }
    }

    async fn distribute(&self, plan: &SigningPlan) -> Result<()> {
        let mut targets = Vec::new();
        for project in plan.copy_forward.iter().chain(&plan.to_sign) {
            targets.push((project.clone(), order::dependency_closure(project, self.model)?));
        }

        let fanout = self.fanout;
        tokio::task::spawn_blocking(move || -> Result<()> {
            for (project, dependencies) in &targets {
                if !dependencies.is_empty() {
                    fanout.propagate_dependencies(project, dependencies)?;
                }
                fanout.publish_web(project)?;
            }
            Ok(())
        })
        .await?
    }
}
