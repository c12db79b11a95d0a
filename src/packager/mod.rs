//! Incremental build-and-deploy pipeline.
//!
//! Takes a set of dependent projects, packages the ones that are stale in
//! dependency order, signs what needs signing, publishes deliverables and
//! finally deploys them to a simulator or device.

pub mod artifact;
pub mod checksum;
pub mod collaborators;
pub mod compiler;
pub mod device;
pub mod error;
pub mod fanout;
pub mod incremental;
pub mod manifest;
pub mod order;
pub mod pipeline;
pub mod problem;
pub mod project;
pub mod signing;
pub mod status;
pub mod tool_detection;
pub mod utils;

pub use artifact::{Artifact, ArtifactKind};
pub use collaborators::{
    BuildStateStore, InMemoryMarkers, JsonBuildStateStore, JsonProblemMarkers, ProblemMarkers,
    ProjectModel, StaticProjectModel,
};
pub use compiler::{ArtifactCompiler, CompileOutcome, CompileResult};
pub use device::{
    ANY_DEVICE, Deliverable, DeployState, DeploymentTarget, DeviceDeployer, DeviceWait,
    HotSwapSession, LoaderTool, NoHotSwap, ProcessLoader, TargetKind,
};
pub use error::{Context, Error, ErrorExt, Result};
pub use fanout::DeploymentFanout;
pub use incremental::{BuildDecision, IncrementalBuildDecider, RebuildReason};
pub use manifest::{CodEntry, Descriptor};
pub use pipeline::{
    BuildActivity, PackagingPipeline, PackagingReport, PostBuildHook, ProjectOutcome,
    ProjectReport,
};
pub use problem::{Problem, ProblemKind, Severity};
pub use project::{
    AppType, CompileOptions, OutputSettings, Project, ProjectBuilder, ProtectionOption,
    ProtectionScope, Toolchain,
};
pub use signing::{SigningConfig, SigningCoordinator, SigningMode, SigningOutcome, SigningPlan};
pub use status::Status;
