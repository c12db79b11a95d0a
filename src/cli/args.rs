//! Command line argument parsing and validation.

use crate::metadata::MANIFEST_FILE;
use crate::packager::{SigningMode, TargetKind};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental packager and deployer for handheld application projects
#[derive(Parser, Debug)]
#[command(
    name = "codship",
    version,
    about = "Package, sign and deploy multi-project handheld applications",
    long_about = "Packages the projects of a codship.toml workspace in dependency order,
recompiling only what changed, signs code that uses protected APIs and
pushes the results to a simulator or a connected device.

Usage:
  codship package
  codship package app --signing force
  codship deploy app --target device --device 0x2100000A

Exit code 0 = every requested project is packaged (and deployed)."
)]
pub struct Args {
    /// Workspace manifest
    #[arg(short, long, value_name = "PATH", default_value = MANIFEST_FILE, global = true)]
    pub manifest: PathBuf,

    /// File holding the per-project "needs rebuild" flags
    #[arg(long, value_name = "PATH", env = "CODSHIP_STATE_FILE", global = true)]
    pub state_file: Option<PathBuf>,

    /// Print compiler output and per-step details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Package projects and their dependencies
    Package(PackageArgs),
    /// Package, then deploy to the configured target
    Deploy(DeployArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PackageArgs {
    /// Projects to package (default: all)
    #[arg(value_name = "PROJECT")]
    pub projects: Vec<String>,

    /// Overrides [signing].mode: force, if-necessary, if-protected-api-used, no
    #[arg(long, value_name = "MODE")]
    pub signing: Option<SigningMode>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Overrides [deploy].target: simulator or device
    #[arg(long, value_name = "KIND")]
    pub target: Option<TargetKind>,

    /// Device PIN, or "any"
    #[arg(long, value_name = "PIN")]
    pub device: Option<String>,

    /// Keep polling until a device is connected
    #[arg(long)]
    pub wait_for_device: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.manifest.as_os_str().is_empty() {
            return Err("Manifest path cannot be empty".to_string());
        }

        let projects = match &self.command {
            Command::Package(args) => &args.projects,
            Command::Deploy(args) => {
                if args.device.is_some() && args.target == Some(TargetKind::Simulator) {
                    return Err("--device cannot be combined with --target simulator".to_string());
                }
                if let Some(device) = &args.device
                    && device.trim().is_empty()
                {
                    return Err("Device identifier cannot be empty".to_string());
                }
                &args.package.projects
            }
        };
        if let Some(blank) = projects.iter().find(|p| p.trim().is_empty()) {
            return Err(format!("Invalid project name: {blank:?}"));
        }

        Ok(())
    }

    pub fn package_args(&self) -> &PackageArgs {
        match &self.command {
            Command::Package(args) => args,
            Command::Deploy(args) => &args.package,
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
        }
    }
}

impl RuntimeConfig {
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn package_defaults() {
        let args = parse(&["codship", "package"]);
        assert_eq!(args.manifest, PathBuf::from(MANIFEST_FILE));
        assert!(args.package_args().projects.is_empty());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn deploy_flags() {
        let args = parse(&[
            "codship", "deploy", "app", "--target", "device", "--device", "0x2100000A",
            "--wait-for-device", "--signing", "no",
        ]);
        let Command::Deploy(deploy) = &args.command else {
            panic!("expected deploy");
        };
        assert_eq!(deploy.target, Some(TargetKind::Device));
        assert_eq!(deploy.device.as_deref(), Some("0x2100000A"));
        assert!(deploy.wait_for_device);
        assert_eq!(deploy.package.signing, Some(SigningMode::No));
        assert_eq!(args.package_args().projects, ["app"]);
    }

    #[test]
    fn device_pin_requires_device_target() {
        let args = parse(&["codship", "deploy", "--target", "sim", "--device", "any"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["codship", "-q", "-v", "package"]).is_err());
    }
}
