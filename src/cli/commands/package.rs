//! `codship package`

use crate::cli::{OutputManager, RuntimeConfig, args::PackageArgs};
use crate::error::Result;
use crate::metadata::Workspace;
use crate::packager::{
    JsonBuildStateStore, JsonProblemMarkers, PackagingPipeline, PackagingReport, ProjectOutcome,
    SigningOutcome, StaticProjectModel,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Packages the selected projects and prints what happened to each.
///
/// # Arguments
///
/// * `workspace` - Loaded manifest
/// * `args` - Project selection and signing override
/// * `state_file` - Build state location, defaults to the user cache. Problem
///   markers are kept beside it.
/// * `cancel` - Triggered by Ctrl-C
pub async fn execute(
    workspace: &Workspace,
    args: &PackageArgs,
    state_file: Option<&Path>,
    config: &RuntimeConfig,
    cancel: &CancellationToken,
) -> Result<PackagingReport> {
    let projects = workspace.select(&args.projects)?;
    let output = *config.output();

    let state_path = state_file
        .map(Path::to_path_buf)
        .unwrap_or_else(JsonBuildStateStore::default_path);
    output.verbose(&format!("build state: {}", state_path.display()))?;
    let markers = Arc::new(JsonProblemMarkers::open(JsonProblemMarkers::beside(
        &state_path,
    ))?);
    let state = Arc::new(JsonBuildStateStore::open(state_path)?);
    let model = Arc::new(StaticProjectModel::new(workspace.projects.clone()));

    let mut signing = workspace.signing.clone();
    if let Some(mode) = args.signing {
        signing.mode = mode;
    }

    output.progress(&format!("Packaging {} project(s)", projects.len()))?;
    let pipeline = PackagingPipeline::new(model, markers.clone(), state)
        .signing(signing)
        .post_build_hook(Arc::new(move |report: &PackagingReport| {
            if let Err(e) = print_report(&output, report) {
                log::warn!("failed to print report: {}", e);
            }
        }));
    let report = pipeline.run(&projects, cancel).await;

    for project in &projects {
        let problems = markers.problems_under(project.root());
        if problems.is_empty() {
            continue;
        }
        output.section(&format!("Problems in {}", project.name()))?;
        for problem in problems {
            if problem.is_error() {
                output.error(&problem.to_string())?;
            } else {
                output.indent(&problem.to_string())?;
            }
        }
    }

    Ok(report)
}

fn print_report(output: &OutputManager, report: &PackagingReport) -> std::io::Result<()> {
    output.section("Packaging")?;
    for project in &report.projects {
        let line = format!("{}: {}", project.name, project.outcome);
        match project.outcome {
            ProjectOutcome::Packaged | ProjectOutcome::UpToDate | ProjectOutcome::ManifestOnly => {
                output.success(&line)?
            }
            ProjectOutcome::Cancelled => output.warn(&line)?,
            _ => output.error(&line)?,
        }
    }
    match &report.signing {
        SigningOutcome::Skipped => output.verbose("signing: nothing to sign")?,
        SigningOutcome::Signed(names) => {
            output.success(&format!("signed: {}", names.join(", ")))?
        }
        SigningOutcome::Failed(reason) => output.error(&format!("signing failed: {reason}"))?,
        SigningOutcome::Cancelled => output.warn("signing cancelled")?,
    }
    output.verbose(&format!("{} deliverable(s) published", report.deliverables.len()))
}
