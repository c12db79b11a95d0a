//! `codship deploy`

use super::package;
use crate::cli::{RuntimeConfig, args::DeployArgs};
use crate::error::Result;
use crate::metadata::Workspace;
use crate::packager::tool_detection::find_loader;
use crate::packager::{
    DeploymentTarget, DeviceDeployer, DeviceWait, LoaderTool, NoHotSwap, ProcessLoader, Status,
    TargetKind,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Packages the selected projects, then deploys their deliverables.
///
/// Deployment is skipped unless packaging finished with an OK status.
pub async fn execute(
    workspace: &Workspace,
    args: &DeployArgs,
    state_file: Option<&Path>,
    config: &RuntimeConfig,
    cancel: &CancellationToken,
) -> Result<Status> {
    let output = config.output();
    let report = package::execute(workspace, &args.package, state_file, config, cancel).await?;
    let status = report.status();
    if !status.is_ok() {
        output.warn(&format!("not deploying, packaging finished with {status}"))?;
        return Ok(status);
    }

    let target = target_for(&workspace.deploy.target, args);
    let loader: Option<Arc<dyn LoaderTool>> = match target.kind {
        TargetKind::Device => find_loader(
            workspace.loader.as_deref(),
            Some(workspace.toolchain.home.as_path()),
        )
        .map(|path| {
            output.verbose(&format!("loader: {}", path.display())).ok();
            Arc::new(ProcessLoader::new(path).with_password(workspace.deploy.password.clone()))
                as Arc<dyn LoaderTool>
        }),
        TargetKind::Simulator => None,
    };

    let wait = if args.wait_for_device {
        DeviceWait::UntilCancelled
    } else {
        DeviceWait::Once
    };
    let mut deployer =
        DeviceDeployer::new(Arc::new(NoHotSwap::default()), loader).wait_for_device(wait);

    let destination = match target.kind {
        TargetKind::Device => format!("device {}", target.identifier),
        TargetKind::Simulator => format!("simulator in {}", target.directory.display()),
    };
    output.progress(&format!("Deploying to {destination}"))?;
    let status = deployer.deploy(&target, &report.deliverables, cancel).await;
    match &status {
        Status::Ok => output.success("deployment finished")?,
        Status::Cancelled => output.warn("deployment cancelled")?,
        Status::Failed(reason) => output.error(&format!("deployment failed: {reason}"))?,
    }
    Ok(status)
}

/// Applies the command line overrides to the manifest's target.
fn target_for(configured: &DeploymentTarget, args: &DeployArgs) -> DeploymentTarget {
    let mut target = configured.clone();
    let kind = if args.device.is_some() {
        TargetKind::Device
    } else {
        args.target.unwrap_or(configured.kind)
    };
    if kind != target.kind {
        target.kind = kind;
        target.identifier = match kind {
            TargetKind::Device => crate::packager::ANY_DEVICE.to_string(),
            TargetKind::Simulator => String::new(),
        };
    }
    if let Some(device) = &args.device {
        target.identifier = device.clone();
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::PackageArgs;

    fn args(target: Option<TargetKind>, device: Option<&str>) -> DeployArgs {
        DeployArgs {
            package: PackageArgs {
                projects: Vec::new(),
                signing: None,
            },
            target,
            device: device.map(str::to_string),
            wait_for_device: false,
        }
    }

    #[test]
    fn configured_target_is_kept_without_overrides() {
        let configured = DeploymentTarget::simulator("/sim", "8900");
        assert_eq!(target_for(&configured, &args(None, None)), configured);
    }

    #[test]
    fn switching_to_device_targets_any_device() {
        let configured = DeploymentTarget::simulator("/sim", "8900");
        let target = target_for(&configured, &args(Some(TargetKind::Device), None));
        assert!(target.is_any_device());
    }

    #[test]
    fn device_pin_implies_device_target() {
        let configured = DeploymentTarget::simulator("/sim", "8900");
        let target = target_for(&configured, &args(None, Some("0x2100000A")));
        assert_eq!(target.kind, TargetKind::Device);
        assert_eq!(target.identifier, "0x2100000A");
    }
}
