//! Deployment of published deliverables to a simulator or a device.

pub mod hotswap;
pub mod loader;
pub mod machine;

pub use hotswap::{HotSwapSession, NoHotSwap, POLL_INTERVAL};
pub use loader::{LoaderTool, MINIMUM_LOADER_VERSION, ProcessLoader};
pub use machine::{DeployState, DeviceDeployer, DeviceWait, Strategy};

use serde::Deserialize;
use std::path::PathBuf;

/// Device identifier meaning "whichever device is connected first".
pub const ANY_DEVICE: &str = "any";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    #[default]
    Simulator,
    Device,
}

impl std::str::FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulator" | "sim" => Ok(TargetKind::Simulator),
            "device" => Ok(TargetKind::Device),
            other => Err(format!("unknown target `{other}` (expected simulator or device)")),
        }
    }
}

/// Where a deployment goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub kind: TargetKind,
    /// Device PIN, [`ANY_DEVICE`], or the simulator bundle name
    pub identifier: String,
    /// Simulator installation folder that receives copied code
    pub directory: PathBuf,
    /// Simulator configuration file name
    pub config_file: String,
}

impl DeploymentTarget {
    pub fn simulator(directory: impl Into<PathBuf>, bundle: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Simulator,
            identifier: bundle.into(),
            directory: directory.into(),
            config_file: String::new(),
        }
    }

    pub fn device(identifier: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Device,
            identifier: identifier.into(),
            directory: PathBuf::new(),
            config_file: String::new(),
        }
    }

    pub fn is_any_device(&self) -> bool {
        self.kind == TargetKind::Device && self.identifier.eq_ignore_ascii_case(ANY_DEVICE)
    }
}

/// A published file ready to be deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deliverable {
    /// Owning project
    pub project: String,
    pub path: PathBuf,
    /// `true` if the owning project is only in the batch as someone's
    /// dependency
    pub dependency_only: bool,
}
