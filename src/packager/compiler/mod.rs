//! External compiler driver.
//!
//! Turns a [`Project`] into a compiler invocation, runs it with the project
//! root as working directory and files every diagnostic it prints as a
//! [`Problem`] marker on the offending resource.

pub mod command;
pub mod diagnostics;
pub mod process;

pub use command::{CompilerInvocation, build_invocation};
pub use diagnostics::{ParserState, Transition};
pub use process::RunResult;

use super::artifact::ArtifactKind;
use super::collaborators::ProblemMarkers;
use super::error::{Error, ErrorExt, Result};
use super::manifest::Descriptor;
use super::problem::{Problem, ProblemKind};
use super::project::{AppType, Project};
use super::utils::fs;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Result of a finished compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub problems: Vec<Problem>,
    /// Exit code zero and no error diagnostics
    pub success: bool,
}

impl CompileOutcome {
    pub fn error_count(&self) -> usize {
        self.problems.iter().filter(|p| p.is_error()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Completed(CompileOutcome),
    Cancelled,
}

/// Compiles projects and reports diagnostics through the marker store.
pub struct ArtifactCompiler<'a> {
    markers: &'a dyn ProblemMarkers,
}

impl<'a> ArtifactCompiler<'a> {
    pub fn new(markers: &'a dyn ProblemMarkers) -> Self {
        Self { markers }
    }

    /// Compiles `project` against the already built `dependencies`.
    ///
    /// A non-zero exit is not an error: whatever diagnostics were printed are
    /// returned and marked. Only a compiler that cannot be found or launched
    /// fails the call.
    ///
    /// # Arguments
    ///
    /// * `project` - Project to compile
    /// * `dependencies` - Direct dependencies, already packaged
    /// * `cancel` - Kills the compiler when triggered
    pub async fn compile(
        &self,
        project: &Project,
        dependencies: &[Project],
        cancel: &CancellationToken,
    ) -> Result<CompileResult> {
        let toolchain = project.toolchain();
        let compiler = toolchain.compiler_path();
        if !compiler.is_file() {
            return Err(Error::MissingToolchain(format!(
                "compiler {} does not exist (toolchain home {})",
                compiler.display(),
                toolchain.home.display()
            )));
        }

        fs::create_dir_all(&project.standard_dir())?;
        write_build_descriptor(project)?;

        let invocation = build_invocation(project, dependencies);
        if let Some((path, content)) = &invocation.argument_file {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content).fs_context("writing argument file", path)?;
        }

        self.markers.clear_problems(project.root(), ProblemKind::Compiler);
        log::info!("compiling {}", project.name());
        log::debug!("{}", invocation.command_line());

        let root = project.root().to_path_buf();
        let mut parser = ParserState::Idle;
        let mut problems = Vec::new();
        let result = process::run_streaming(
            &invocation,
            command::merged_path(toolchain.extra_path.as_deref()),
            cancel,
            |line| {
                let transition = diagnostics::step(std::mem::take(&mut parser), &line, &root);
                parser = transition.state;
                problems.extend(transition.completed);
                if !transition.consumed {
                    log::info!(target: "codship::compiler", "{}", line);
                }
            },
        )
        .await?;
        problems.extend(diagnostics::finish(parser));

        let exit_code = match result {
            RunResult::Cancelled => return Ok(CompileResult::Cancelled),
            RunResult::Exited(code) => code,
        };

        for problem in &problems {
            let resource = problem.file.as_deref().unwrap_or(project.root());
            self.markers
                .mark_problem(resource, ProblemKind::Compiler, problem);
        }

        let outcome = CompileOutcome {
            exit_code,
            success: exit_code == Some(0) && !problems.iter().any(Problem::is_error),
            problems,
        };
        if !outcome.success {
            log::warn!(
                "{}: compiler exited with {:?} and {} error(s)",
                project.name(),
                exit_code,
                outcome.error_count()
            );
        }
        Ok(CompileResult::Completed(outcome))
    }
}

/// Writes `<base>.rapc` into the standard output folder, copying the custom
/// build script when one is configured.
pub fn write_build_descriptor(project: &Project) -> Result<PathBuf> {
    let path = project.artifact_path(ArtifactKind::Rapc);

    if let Some(custom) = project.custom_build_script() {
        std::fs::copy(&custom, &path).fs_context("copying build script", &custom)?;
        return Ok(path);
    }

    let properties = project.properties();
    let property = |key: &str, default: &str| {
        properties
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    let mut descriptor = Descriptor::new();
    descriptor.set_property("MIDlet-Name", &property("MIDlet-Name", project.name()));
    descriptor.set_property("MIDlet-Version", &property("MIDlet-Version", "1.0.0"));
    descriptor.set_property("MIDlet-Vendor", &property("MIDlet-Vendor", "<unknown>"));
    descriptor.set_property(
        "MIDlet-Jar-URL",
        &format!("{}.{}", project.base_name(), ArtifactKind::Jar.extension()),
    );
    descriptor.set_property("MIDlet-Jar-Size", "0");
    descriptor.set_property("MicroEdition-Profile", "MIDP-2.0");
    descriptor.set_property("MicroEdition-Configuration", "CLDC-1.1");
    match project.app_type() {
        AppType::Library => descriptor.set_property("RIM-Library-Flags", "1"),
        AppType::Application => descriptor.set_property("RIM-MIDlet-Flags-1", "0"),
        AppType::AlternateEntry => descriptor.set_property("RIM-MIDlet-Flags-1", "1"),
    }
    for (key, value) in properties {
        descriptor.set_property(key, value);
    }

    descriptor.write(&path)?;
    Ok(path)
}
